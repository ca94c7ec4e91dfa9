//! Workflow definitions and lookup.

use crate::{CoordinationError, CoordinationResult};
use async_trait::async_trait;
use fhir::Coding;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_WORKFLOWS: &str = include_str!("../../workflows/default.yaml");

/// A `system` + `code` pair as written in workflow definition files.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeKey {
    pub system: String,
    pub code: String,
}

impl CodeKey {
    fn matches(&self, coding: &Coding) -> bool {
        coding.system.as_deref() == Some(self.system.as_str())
            && coding.code.as_deref() == Some(self.code.as_str())
    }
}

/// Questionnaires to be answered, in order, before a Task for `service` and `condition` can be
/// accepted.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub service: CodeKey,
    pub condition: CodeKey,
    #[serde(default)]
    pub questionnaires: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowFile {
    workflows: Vec<WorkflowDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowStep {
    pub questionnaire_url: String,
}

/// An ordered sequence of questionnaire steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workflow {
    steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn new(questionnaire_urls: impl IntoIterator<Item = String>) -> Self {
        Self {
            steps: questionnaire_urls
                .into_iter()
                .map(|questionnaire_url| WorkflowStep { questionnaire_url })
                .collect(),
        }
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// The first step, or `None` when nothing has to be answered.
    pub fn start(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    /// The step after the one asking `previous_questionnaire_url`.
    ///
    /// # Errors
    ///
    /// Returns `CoordinationError::TaskRejection` if the questionnaire is not part of this
    /// workflow.
    pub fn proceed(
        &self,
        previous_questionnaire_url: &str,
    ) -> CoordinationResult<Option<&WorkflowStep>> {
        let position = self
            .steps
            .iter()
            .position(|step| step.questionnaire_url == previous_questionnaire_url)
            .ok_or_else(|| {
                CoordinationError::TaskRejection(format!(
                    "questionnaire {previous_questionnaire_url} is not part of the workflow"
                ))
            })?;
        Ok(self.steps.get(position + 1))
    }
}

/// Maps a (service, condition) pair to a workflow.
#[async_trait]
pub trait WorkflowProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `CoordinationError::TaskRejection` when no workflow or more than one workflow
    /// matches.
    async fn provide(&self, service: &Coding, condition: &Coding) -> CoordinationResult<Workflow>;
}

/// Workflow definitions held in memory, loaded from YAML.
#[derive(Clone, Debug)]
pub struct MemoryWorkflowProvider {
    definitions: Vec<WorkflowDefinition>,
}

impl MemoryWorkflowProvider {
    pub fn new(definitions: Vec<WorkflowDefinition>) -> Self {
        Self { definitions }
    }

    /// Parse definitions from YAML.
    ///
    /// Unknown keys are rejected and errors name the offending path (e.g.
    /// `workflows[1].service.code`).
    pub fn from_yaml_str(yaml: &str) -> CoordinationResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml);
        let file: WorkflowFile = serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            CoordinationError::WorkflowDefinition(format!("at {path}: {}", err.into_inner()))
        })?;

        if let Some(empty) = file
            .workflows
            .iter()
            .find(|d| d.service.code.is_empty() || d.condition.code.is_empty())
        {
            return Err(CoordinationError::WorkflowDefinition(format!(
                "workflow for {}|{} has an empty code",
                empty.service.system, empty.condition.system
            )));
        }

        Ok(Self::new(file.workflows))
    }

    pub fn from_file(path: &Path) -> CoordinationResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(CoordinationError::WorkflowFileRead)?;
        Self::from_yaml_str(&yaml)
    }

    /// The definitions shipped with the crate.
    pub fn builtin() -> CoordinationResult<Self> {
        Self::from_yaml_str(DEFAULT_WORKFLOWS)
    }

    pub fn definitions(&self) -> &[WorkflowDefinition] {
        &self.definitions
    }
}

#[async_trait]
impl WorkflowProvider for MemoryWorkflowProvider {
    async fn provide(&self, service: &Coding, condition: &Coding) -> CoordinationResult<Workflow> {
        let mut matches = self
            .definitions
            .iter()
            .filter(|d| d.service.matches(service) && d.condition.matches(condition));

        let describe = |c: &Coding| {
            format!(
                "{}|{}",
                c.system.as_deref().unwrap_or_default(),
                c.code.as_deref().unwrap_or_default()
            )
        };

        match (matches.next(), matches.next()) {
            (Some(definition), None) => Ok(Workflow::new(definition.questionnaires.clone())),
            (None, _) => Err(CoordinationError::TaskRejection(format!(
                "unsupported service {} for condition {}",
                describe(service),
                describe(condition)
            ))),
            (Some(_), Some(_)) => Err(CoordinationError::TaskRejection(format!(
                "ambiguous workflow for service {} and condition {}",
                describe(service),
                describe(condition)
            ))),
        }
    }
}
