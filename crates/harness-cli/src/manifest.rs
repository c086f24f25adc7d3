//! Declarative JSON suite manifests.
//!
//! A manifest names the suite, its dependencies (with `depends_on` edges
//! and output bindings) and a list of test cases. String values may carry
//! templates, expanded when the case runs:
//!
//! - `{random}`: the suite's random identifier
//! - `{dep:NAME.KEY}`: output `KEY` of dependency `NAME`
//! - `{input:KEY}`: input `KEY` of the component under test (expectations only)
//!
//! A string that is exactly one `{dep:..}` or `{input:..}` template keeps
//! the referenced value's JSON type.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use infra_harness_core::assertions::{assert_equal, assert_not_empty, assert_parameter_equals};
use infra_harness_core::{
    render_output, ComponentDescriptor, DependencyEntry, Inputs, OutputMap, ParameterStore,
    RandomIdentifier, Suite, TestCase, TestContext,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteManifest {
    pub name: String,
    /// Region for parameter-store lookups; required by `expect_parameters`.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Deploy, check expectations, optionally check drift.
    #[default]
    Deploy,
    /// Deploy with `enabled = false` and require no outputs.
    EnabledFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    pub component: String,
    pub stack: String,
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub kind: TestKind,
    /// Output key → expected rendered value (templated).
    #[serde(default)]
    pub expect_outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub expect_non_empty: Vec<String>,
    #[serde(default)]
    pub expect_parameters: Vec<ParameterExpectation>,
    #[serde(default)]
    pub drift_test: bool,
}

/// The parameter at `path` (templated) must equal output `equals_output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterExpectation {
    pub path: String,
    pub equals_output: String,
}

impl SuiteManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("parse manifest {:?}", path))
    }

    /// Check the manifest without deploying anything.
    ///
    /// Builds the dependency graph (duplicate names, cycles, unknown
    /// references) and checks that every `{dep:..}` template names a
    /// declared dependency.
    pub fn validate(&self) -> Result<()> {
        let suite = self.to_suite(&RandomIdentifier::generate(), None)?;
        suite.graph().resolve_order()?;
        Ok(())
    }

    /// Build a runnable suite. `{random}` in dependency inputs is expanded here.
    ///
    /// Without a `store`, parameter expectations are not checked; `plan` and
    /// `validate` build suites this way.
    pub fn to_suite(
        &self,
        random: &RandomIdentifier,
        store: Option<Arc<dyn ParameterStore>>,
    ) -> Result<Suite> {
        let mut suite = Suite::new(self.name.clone());
        let no_deps = HashMap::new();
        let templates = Templates::new(random.as_str(), &no_deps);

        for entry in &self.dependencies {
            let mut entry = entry.clone();
            entry.descriptor.inputs = templates
                .expand_inputs(&entry.descriptor.inputs)
                .with_context(|| format!("dependency '{}'", entry.name))?;
            suite.add_dependency_entry(entry)?;
        }

        for spec in &self.tests {
            for dep in spec.dependency_references() {
                if suite.graph().get(&dep).is_none() {
                    bail!("test '{}' references unknown dependency '{}'", spec.name, dep);
                }
            }
            if let Some(key) = spec.input_references_in_inputs().into_iter().next() {
                bail!(
                    "test '{}' uses {{input:{}}} in its inputs; input templates are only valid in expectations",
                    spec.name,
                    key
                );
            }
            if !spec.expect_parameters.is_empty() && self.region.is_none() {
                bail!(
                    "test '{}' checks parameters but the manifest has no region",
                    spec.name
                );
            }
            suite.add_test(ManifestCase {
                spec: spec.clone(),
                store: store.clone(),
            })?;
        }
        Ok(suite)
    }
}

impl TestSpec {
    /// Dependencies named by `{dep:..}` templates anywhere in this test.
    pub fn dependency_references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        let mut collect = |s: &str| {
            for caps in template_regex().captures_iter(s) {
                if let Some(dep) = caps.get(2) {
                    refs.insert(dep.as_str().to_string());
                }
            }
        };
        for value in self.inputs.values() {
            visit_strings(value, &mut collect);
        }
        for expected in self.expect_outputs.values() {
            collect(expected);
        }
        for param in &self.expect_parameters {
            collect(&param.path);
        }
        refs
    }

    /// Keys named by `{input:..}` templates inside `inputs`, which cannot resolve.
    pub fn input_references_in_inputs(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        let mut collect = |s: &str| {
            for caps in template_regex().captures_iter(s) {
                if let Some(key) = caps.get(4) {
                    refs.insert(key.as_str().to_string());
                }
            }
        };
        for value in self.inputs.values() {
            visit_strings(value, &mut collect);
        }
        refs
    }
}

fn visit_strings(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| visit_strings(v, f)),
        Value::Object(map) => map.values().for_each(|v| visit_strings(v, f)),
        _ => {}
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(random|dep:([^.{}]+)\.([^{}]+)|input:([^{}]+))\}")
            .expect("template pattern is valid")
    })
}

/// Template expansion context.
pub struct Templates<'a> {
    random: &'a str,
    dependencies: &'a HashMap<String, OutputMap>,
    inputs: Option<&'a Inputs>,
}

impl<'a> Templates<'a> {
    pub fn new(random: &'a str, dependencies: &'a HashMap<String, OutputMap>) -> Self {
        Self {
            random,
            dependencies,
            inputs: None,
        }
    }

    pub fn with_inputs(mut self, inputs: &'a Inputs) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Expand every template in `template`.
    pub fn expand(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in template_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);
            out.push_str(&render_output(&self.lookup(&caps)?));
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    /// Expand templates inside every string of `value`.
    pub fn expand_value(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => match self.whole_reference(s)? {
                Some(v) => v,
                None => Value::String(self.expand(s)?),
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.expand_value(v))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(self.expand_inputs(map)?),
            other => other.clone(),
        })
    }

    pub fn expand_inputs(&self, inputs: &Inputs) -> Result<Inputs> {
        inputs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.expand_value(v)?)))
            .collect()
    }

    /// A string that is one `{dep:..}` / `{input:..}` template keeps its type.
    fn whole_reference(&self, s: &str) -> Result<Option<Value>> {
        let Some(caps) = template_regex().captures(s) else {
            return Ok(None);
        };
        let whole = caps.get(0).map(|m| m.as_str().len()).unwrap_or(0);
        if whole != s.len() || &caps[1] == "random" {
            return Ok(None);
        }
        self.lookup(&caps).map(Some)
    }

    fn lookup(&self, caps: &Captures<'_>) -> Result<Value> {
        if &caps[1] == "random" {
            return Ok(Value::String(self.random.to_string()));
        }
        if let (Some(dep), Some(key)) = (caps.get(2), caps.get(3)) {
            let outputs = self
                .dependencies
                .get(dep.as_str())
                .ok_or_else(|| anyhow!("no outputs fetched for dependency '{}'", dep.as_str()))?;
            return outputs
                .get(key.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("dependency '{}' has no output '{}'", dep.as_str(), key.as_str()));
        }
        if let Some(key) = caps.get(4) {
            let inputs = self
                .inputs
                .ok_or_else(|| anyhow!("{{input:{}}} is only valid in expectations", key.as_str()))?;
            return inputs
                .get(key.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("no input '{}' on the component under test", key.as_str()));
        }
        bail!("unrecognised template {}", &caps[0])
    }
}

/// A manifest test case.
pub struct ManifestCase {
    spec: TestSpec,
    store: Option<Arc<dyn ParameterStore>>,
}

#[async_trait]
impl TestCase for ManifestCase {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn run(&self, ctx: &TestContext<'_>) -> Result<()> {
        let spec = &self.spec;
        let mut dependencies = HashMap::new();
        for dep in spec.dependency_references() {
            let outputs = ctx.dependency_outputs(&dep).await?;
            dependencies.insert(dep, outputs);
        }

        let templates = Templates::new(ctx.random_identifier().as_str(), &dependencies);
        let inputs = templates.expand_inputs(&spec.inputs)?;

        if spec.kind == TestKind::EnabledFlag {
            ctx.verify_enabled_flag(&spec.component, &spec.stack, inputs)
                .await?;
            return Ok(());
        }

        let descriptor = ComponentDescriptor::new(&spec.component, &spec.stack).with_inputs(inputs);
        let handle = ctx.deploy(&descriptor).await?;
        let templates = templates.with_inputs(&descriptor.inputs);

        for key in &spec.expect_non_empty {
            assert_not_empty(key, &ctx.output(&handle, key).await?)?;
        }
        for (key, expected) in &spec.expect_outputs {
            let expected = templates.expand(expected)?;
            let actual = ctx.output(&handle, key).await?;
            assert_equal(&format!("output {key}"), expected.as_str(), actual.as_str())?;
        }
        if let Some(store) = &self.store {
            for param in &spec.expect_parameters {
                let path = templates.expand(&param.path)?;
                let expected = ctx.output(&handle, &param.equals_output).await?;
                assert_parameter_equals(store.as_ref(), &path, &expected).await?;
            }
        }
        if spec.drift_test {
            ctx.drift_test(&descriptor).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_harness_backend::fakes::{MemoryBackend, MemoryParameterStore, Operation};
    use infra_harness_core::{CaseOutcome, HarnessConfig, SuiteController};
    use serde_json::json;

    const DEMO: &str = include_str!("../../../demos/acm-suite.json");

    fn demo() -> SuiteManifest {
        serde_json::from_str(DEMO).unwrap()
    }

    #[test]
    fn test_demo_manifest_parses_and_validates() {
        let manifest = demo();
        assert_eq!(manifest.name, "acm");
        assert_eq!(manifest.tests[1].kind, TestKind::EnabledFlag);
        manifest.validate().unwrap();
        assert_eq!(
            manifest.tests[0].dependency_references().into_iter().collect::<Vec<_>>(),
            vec!["dns-delegated"]
        );
    }

    #[test]
    fn test_expand_templates() {
        let mut deps = HashMap::new();
        let mut dns = OutputMap::new();
        dns.insert("default_domain_name".to_string(), json!("components.example.com"));
        dns.insert("zone_ids".to_string(), json!(["Z1", "Z2"]));
        deps.insert("dns".to_string(), dns);
        let templates = Templates::new("abc123", &deps);

        assert_eq!(
            templates.expand("{random}.{dep:dns.default_domain_name}").unwrap(),
            "abc123.components.example.com"
        );
        assert_eq!(templates.expand("no templates").unwrap(), "no templates");
        assert_eq!(
            templates.expand_value(&json!("{dep:dns.zone_ids}")).unwrap(),
            json!(["Z1", "Z2"])
        );
        assert_eq!(
            templates
                .expand_value(&json!([{ "subdomain": "{random}" }]))
                .unwrap(),
            json!([{ "subdomain": "abc123" }])
        );
        assert!(templates.expand("{dep:dns.missing}").is_err());
        assert!(templates.expand("{input:domain_name}").is_err());
    }

    #[test]
    fn test_unknown_dependency_reference_rejected() {
        let mut manifest = demo();
        manifest.tests[0]
            .inputs
            .insert("zone".to_string(), json!("{dep:vpc.id}"));
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("vpc"));
    }

    #[test]
    fn test_input_template_in_inputs_rejected_before_run() {
        let mut manifest = demo();
        manifest.tests[0]
            .inputs
            .insert("alias".to_string(), json!(["www.{input:domain_name}"]));
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("{input:domain_name}"));
    }

    #[test]
    fn test_duplicate_dependency_rejected() {
        let mut manifest = demo();
        manifest.dependencies.push(manifest.dependencies[0].clone());
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_parameters_need_region() {
        let mut manifest = demo();
        manifest.region = None;
        assert!(manifest.validate().is_err());
    }

    #[tokio::test]
    async fn test_demo_manifest_runs_against_memory_backend() {
        let random = RandomIdentifier::new("abc123").unwrap();
        let mut dns = OutputMap::new();
        dns.insert(
            "default_domain_name".to_string(),
            json!("components.cptest.test-automation.app"),
        );
        let mut acm = OutputMap::new();
        acm.insert("arn".to_string(), json!("arn:aws:acm:us-east-2:1:certificate/x"));
        acm.insert("id".to_string(), json!("x"));
        let backend = Arc::new(
            MemoryBackend::new()
                .with_outputs("dns-delegated", dns)
                .with_outputs("acm/basic", acm),
        );
        let store = Arc::new(MemoryParameterStore::new());
        store.put(
            "/acm/abc123.components.cptest.test-automation.app",
            "arn:aws:acm:us-east-2:1:certificate/x",
        );

        let suite = demo().to_suite(&random, Some(store as Arc<dyn ParameterStore>)).unwrap();
        let controller = SuiteController::new(backend.clone(), random, HarnessConfig::default());
        let report = controller.run(&suite).await;

        assert!(report.success, "{report:#?}");
        assert_eq!(report.case("basic").unwrap().outcome, CaseOutcome::Passed);
        assert_eq!(report.case("enabled-flag").unwrap().outcome, CaseOutcome::Passed);
        assert!(backend.deployed().is_empty());
        assert_eq!(
            backend
                .calls_for(Operation::Deploy)
                .into_iter()
                .map(|c| c.component)
                .collect::<Vec<_>>(),
            vec!["dns-delegated", "acm/basic", "acm/disabled"]
        );
    }

    #[tokio::test]
    async fn test_wrong_parameter_fails_case() {
        let random = RandomIdentifier::new("abc123").unwrap();
        let mut dns = OutputMap::new();
        dns.insert("default_domain_name".to_string(), json!("example.com"));
        let mut acm = OutputMap::new();
        acm.insert("arn".to_string(), json!("arn:1"));
        acm.insert("id".to_string(), json!("1"));
        let backend = Arc::new(
            MemoryBackend::new()
                .with_outputs("dns-delegated", dns)
                .with_outputs("acm/basic", acm),
        );
        let store = Arc::new(MemoryParameterStore::new());
        store.put("/acm/abc123.example.com", "arn:other");

        let suite = demo().to_suite(&random, Some(store as Arc<dyn ParameterStore>)).unwrap();
        let report = SuiteController::new(backend.clone(), random, HarnessConfig::default())
            .run(&suite)
            .await;

        assert!(!report.success);
        assert!(matches!(
            report.case("basic").unwrap().outcome,
            CaseOutcome::Failed {
                assertion: true,
                ..
            }
        ));
        assert!(backend.deployed().is_empty());
    }
}
