// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline definition structures
//!
//! Defines the serializable definition surface: parameters, steps, the
//! inputs they consume (literals, parameters, or deferred references to
//! upstream outputs) and the artifacts they declare.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::cache::hash_string;
use crate::config::parse_duration;
use crate::errors::{TrainflowError, TrainflowResult};

/// Content type assumed for outputs that don't declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type required for outputs read through a `json_path`
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Whether a content type is JSON, ignoring parameters such as `charset`
pub fn is_json_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map_or(false, |media| media.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
}

/// Pipeline definition as written by users and persisted by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Definition format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Run-time parameters, in declaration order
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Top-level steps, in declaration order
    pub steps: Vec<Step>,
}

fn default_version() -> String {
    "1".to_string()
}

impl PipelineDefinition {
    /// Create an empty definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Load a definition from a YAML or JSON file (chosen by extension)
    pub fn from_file(path: &Path) -> TrainflowResult<Self> {
        if !path.exists() {
            return Err(TrainflowError::DefinitionNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| TrainflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a definition from YAML
    pub fn from_yaml(yaml: &str) -> TrainflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse a definition from JSON
    pub fn from_json(json: &str) -> TrainflowResult<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> TrainflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> TrainflowResult<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    /// Find a step by id, searching condition branches too
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        find_step(&self.steps, id)
    }

    /// Find a declared parameter
    pub fn get_parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

fn find_step<'a>(steps: &'a [Step], id: &str) -> Option<&'a Step> {
    for step in steps {
        if step.id == id {
            return Some(step);
        }
        if let Some((if_steps, else_steps)) = step.branches() {
            if let Some(found) = find_step(if_steps, id).or_else(|| find_step(else_steps, id)) {
                return Some(found);
            }
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameters and values
// ─────────────────────────────────────────────────────────────────────────────

/// A pipeline parameter, bound once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,

    /// Declared type
    #[serde(rename = "type")]
    pub param_type: ParameterType,

    /// Value used when a run doesn't override it
    pub default: Value,
}

impl Parameter {
    pub fn integer(name: impl Into<String>, default: i64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Integer,
            default: Value::Integer(default),
        }
    }

    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Float,
            default: Value::Float(default),
        }
    }

    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::String,
            default: Value::String(default.into()),
        }
    }
}

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Integer,
    Float,
    String,
}

impl ParameterType {
    /// Coerce a value into this type; integers widen to floats
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Integer, Value::Integer(i)) => Some(Value::Integer(*i)),
            (Self::Float, Value::Float(f)) => Some(Value::Float(*f)),
            (Self::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
            (Self::String, Value::String(s)) => Some(Value::String(s.clone())),
            _ => None,
        }
    }

    /// Parse a command-line value for this type
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        match self {
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| format!("expected an integer: {}", e)),
            Self::Float => raw
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| format!("expected a float: {}", e)),
            Self::String => Ok(Value::String(raw.to_string())),
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
        }
    }
}

/// A literal scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(_) => None,
        }
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs and references
// ─────────────────────────────────────────────────────────────────────────────

/// Deferred pointer to an output of another step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyReference {
    /// Id of the producing step
    pub step: String,

    /// Name of the declared output on that step
    pub output: String,

    /// Dotted path into the output's JSON document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
}

impl PropertyReference {
    pub fn new(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            output: output.into(),
            json_path: None,
        }
    }

    pub fn with_json_path(mut self, path: impl Into<String>) -> Self {
        self.json_path = Some(path.into());
        self
    }
}

impl std::fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.step, self.output)?;
        if let Some(ref path) = self.json_path {
            write!(f, "[{}]", path)?;
        }
        Ok(())
    }
}

/// A step input or condition operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    /// Output of an upstream step
    Reference(PropertyReference),

    /// Pipeline parameter, substituted at submission time
    Parameter { parameter: String },

    /// Literal value
    Literal(Value),
}

impl Input {
    /// Reference to an output location
    pub fn output(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference(PropertyReference::new(step, output))
    }

    /// Reference to a scalar inside a JSON output
    pub fn json(step: impl Into<String>, output: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Reference(PropertyReference::new(step, output).with_json_path(path))
    }

    /// Reference to a pipeline parameter
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter {
            parameter: name.into(),
        }
    }

    pub fn reference(&self) -> Option<&PropertyReference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Self::Parameter { parameter } => Some(parameter),
            _ => None,
        }
    }
}

impl From<Value> for Input {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl From<i64> for Input {
    fn from(v: i64) -> Self {
        Self::Literal(Value::Integer(v))
    }
}

impl From<f64> for Input {
    fn from(v: f64) -> Self {
        Self::Literal(Value::Float(v))
    }
}

impl From<&str> for Input {
    fn from(v: &str) -> Self {
        Self::Literal(Value::String(v.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifacts
// ─────────────────────────────────────────────────────────────────────────────

/// Output declared by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    /// Output name, unique within the step
    pub name: String,

    /// Content type tag of the produced artifact
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

impl OutputDecl {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
        }
    }

    pub fn is_json(&self) -> bool {
        is_json_content_type(&self.content_type)
    }
}

/// An output produced by a successful step execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Output name
    pub name: String,

    /// Location in the artifact store
    pub location: String,

    /// Content type tag
    pub content_type: String,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            content_type: content_type.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// The program a compute step runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Command line passed to the shell
    pub command: String,

    /// Shell to use (bash, sh, etc.)
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Explicit code version; overrides the command hash as code identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Program {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: default_shell(),
            code_version: None,
        }
    }

    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    /// Identity of the program for cache signatures
    pub fn code_identity(&self) -> String {
        match self.code_version {
            Some(ref version) => version.clone(),
            None => hash_string(&format!("{}\0{}", self.shell, self.command)),
        }
    }
}

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Operator {
    /// Apply the operator to two numbers
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThanOrEqual => left >= right,
            Self::GreaterThan => left > right,
            Self::LessThanOrEqual => left <= right,
            Self::LessThan => left < right,
            Self::Equal => left == right,
            Self::NotEqual => left != right,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::GreaterThanOrEqual => ">=",
            Self::GreaterThan => ">",
            Self::LessThanOrEqual => "<=",
            Self::LessThan => "<",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        };
        write!(f, "{}", symbol)
    }
}

/// A single comparison owned by a condition step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub left: Input,
    pub operator: Operator,
    pub right: Input,
}

impl Condition {
    pub fn new(left: impl Into<Input>, operator: Operator, right: impl Into<Input>) -> Self {
        Self {
            left: left.into(),
            operator,
            right: right.into(),
        }
    }
}

/// Which branch of a condition step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    If,
    Else,
}

impl Branch {
    pub fn other(&self) -> Self {
        match self {
            Self::If => Self::Else,
            Self::Else => Self::If,
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::If => write!(f, "if"),
            Self::Else => write!(f, "else"),
        }
    }
}

/// Kind-specific payload of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepKind {
    /// Data processing / evaluation job
    Processing { program: Program },

    /// Model training job
    Training {
        program: Program,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        hyperparameters: BTreeMap<String, Input>,
    },

    /// Model registration job
    Registration { program: Program, model_group: String },

    /// Branch point; exactly one branch runs per pipeline run
    Condition {
        conditions: Vec<Condition>,
        #[serde(default)]
        if_steps: Vec<Step>,
        #[serde(default)]
        else_steps: Vec<Step>,
    },
}

/// Per-step caching configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Reuse prior results with an identical signature
    #[serde(default)]
    pub enabled: bool,

    /// Entry lifetime, e.g. "30d"; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<String>,
}

impl CacheSettings {
    pub fn enabled(expire_after: Option<&str>) -> Self {
        Self {
            enabled: true,
            expire_after: expire_after.map(String::from),
        }
    }

    /// Entry lifetime; `None` means the entry never expires
    pub fn ttl(&self, default: Option<Duration>) -> Result<Option<Duration>, String> {
        match self.expire_after {
            Some(ref raw) => parse_duration(raw).map(Some),
            None => Ok(default),
        }
    }

    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// One node of the pipeline DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step id (unique within the pipeline, branches included)
    pub id: String,

    /// Step description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Kind and kind-specific payload
    #[serde(flatten)]
    pub kind: StepKind,

    /// Named inputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Input>,

    /// Declared outputs, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputDecl>,

    /// Explicit ordering dependencies (step ids)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Caching configuration
    #[serde(default, skip_serializing_if = "CacheSettings::is_default")]
    pub cache: CacheSettings,
}

impl Step {
    fn with_kind(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            description: None,
            kind,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            cache: CacheSettings::default(),
        }
    }

    /// Create a processing step running a shell command
    pub fn processing(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            StepKind::Processing {
                program: Program::shell(command),
            },
        )
    }

    /// Create a training step running a shell command
    pub fn training(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            StepKind::Training {
                program: Program::shell(command),
                hyperparameters: BTreeMap::new(),
            },
        )
    }

    /// Create a registration step running a shell command
    pub fn registration(
        id: impl Into<String>,
        command: impl Into<String>,
        model_group: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            id,
            StepKind::Registration {
                program: Program::shell(command),
                model_group: model_group.into(),
            },
        )
    }

    /// Create a condition step
    pub fn condition(
        id: impl Into<String>,
        conditions: Vec<Condition>,
        if_steps: Vec<Step>,
        else_steps: Vec<Step>,
    ) -> Self {
        Self::with_kind(
            id,
            StepKind::Condition {
                conditions,
                if_steps,
                else_steps,
            },
        )
    }

    pub fn with_input(mut self, name: impl Into<String>, input: impl Into<Input>) -> Self {
        self.inputs.insert(name.into(), input.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.outputs.push(OutputDecl::new(name, content_type));
        self
    }

    pub fn with_hyperparameter(mut self, name: impl Into<String>, input: impl Into<Input>) -> Self {
        if let StepKind::Training {
            ref mut hyperparameters,
            ..
        } = self.kind
        {
            hyperparameters.insert(name.into(), input.into());
        }
        self
    }

    pub fn with_program(mut self, new_program: Program) -> Self {
        match self.kind {
            StepKind::Processing { ref mut program }
            | StepKind::Training { ref mut program, .. }
            | StepKind::Registration { ref mut program, .. } => *program = new_program,
            StepKind::Condition { .. } => {}
        }
        self
    }

    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    /// Kind name for display and signatures
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Processing { .. } => "processing",
            StepKind::Training { .. } => "training",
            StepKind::Registration { .. } => "registration",
            StepKind::Condition { .. } => "condition",
        }
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.kind, StepKind::Condition { .. })
    }

    /// Program run by a compute step
    pub fn program(&self) -> Option<&Program> {
        match &self.kind {
            StepKind::Processing { program }
            | StepKind::Training { program, .. }
            | StepKind::Registration { program, .. } => Some(program),
            StepKind::Condition { .. } => None,
        }
    }

    /// Hyperparameters of a training step (empty for other kinds)
    pub fn hyperparameters(&self) -> Option<&BTreeMap<String, Input>> {
        match &self.kind {
            StepKind::Training {
                hyperparameters, ..
            } => Some(hyperparameters),
            _ => None,
        }
    }

    /// Conditions of a condition step
    pub fn conditions(&self) -> Option<&[Condition]> {
        match &self.kind {
            StepKind::Condition { conditions, .. } => Some(conditions),
            _ => None,
        }
    }

    /// `(if_steps, else_steps)` of a condition step
    pub fn branches(&self) -> Option<(&[Step], &[Step])> {
        match &self.kind {
            StepKind::Condition {
                if_steps,
                else_steps,
                ..
            } => Some((if_steps, else_steps)),
            _ => None,
        }
    }

    /// Every operand this step consumes: inputs, hyperparameters and condition operands
    pub fn consumed(&self) -> Vec<&Input> {
        let mut consumed: Vec<&Input> = self.inputs.values().collect();
        if let Some(hyperparameters) = self.hyperparameters() {
            consumed.extend(hyperparameters.values());
        }
        if let Some(conditions) = self.conditions() {
            for condition in conditions {
                consumed.push(&condition.left);
                consumed.push(&condition.right);
            }
        }
        consumed
    }

    /// Property references this step consumes
    pub fn references(&self) -> Vec<&PropertyReference> {
        self.consumed()
            .into_iter()
            .filter_map(Input::reference)
            .collect()
    }

    /// Dependency set: referenced steps plus explicit `depends_on`
    pub fn dependency_ids(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|r| r.step.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
            .collect()
    }

    /// Look up a declared output
    pub fn output(&self, name: &str) -> Option<&OutputDecl> {
        self.outputs.iter().find(|o| o.name == name)
    }
}
