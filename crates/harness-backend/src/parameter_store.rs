//! SSM parameter lookups through the AWS CLI.

use async_trait::async_trait;
use serde::Deserialize;

use crate::backend_traits::{BackendResult, ParameterStore};
use crate::error::BackendError;
use crate::process::{run_command, CommandSpec};

/// Read-only [`ParameterStore`] backed by `aws ssm get-parameter`.
#[derive(Debug, Clone)]
pub struct AwsCliParameterStore {
    binary: String,
    region: String,
}

impl AwsCliParameterStore {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            binary: "aws".to_string(),
            region: region.into(),
        }
    }

    /// Use a different `aws` executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[derive(Deserialize)]
struct GetParameterResponse {
    #[serde(rename = "Parameter")]
    parameter: ParameterBody,
}

#[derive(Deserialize)]
struct ParameterBody {
    #[serde(rename = "Value")]
    value: String,
}

/// Extract `Parameter.Value` from `aws ssm get-parameter --output json`.
pub fn parse_get_parameter(stdout: &str) -> BackendResult<String> {
    let response: GetParameterResponse = serde_json::from_str(stdout)?;
    Ok(response.parameter.value)
}

#[async_trait]
impl ParameterStore for AwsCliParameterStore {
    async fn get_parameter(&self, path: &str) -> BackendResult<String> {
        let spec = CommandSpec::new(vec![
            self.binary.clone(),
            "ssm".to_string(),
            "get-parameter".to_string(),
            "--name".to_string(),
            path.to_string(),
            "--with-decryption".to_string(),
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
        ]);
        let out = run_command(&spec).await?;
        if !out.success() {
            if out.stderr.contains("ParameterNotFound") {
                return Err(BackendError::ParameterNotFound(path.to_string()));
            }
            return Err(out.into_failure(&spec));
        }
        parse_get_parameter(&out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameter_value() {
        let stdout = r#"{
            "Parameter": {
                "Name": "/acm/abc.example.com",
                "Type": "String",
                "Value": "arn:aws:acm:us-east-2:111111111111:certificate/1234",
                "Version": 1
            }
        }"#;
        assert_eq!(
            parse_get_parameter(stdout).expect("parse"),
            "arn:aws:acm:us-east-2:111111111111:certificate/1234"
        );
    }

    #[test]
    fn rejects_unexpected_shape() {
        assert!(matches!(
            parse_get_parameter(r#"{"Parameters": []}"#),
            Err(BackendError::Json(_))
        ));
    }
}
