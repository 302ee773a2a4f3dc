use crate::config::{EnvConfig, Settings};
use crate::error::PipelineError;
use crate::evaluate::evaluate;
use crate::evaluators::quality_evaluators;
use crate::flow::{ColumnMapping, FlowClient, FlowRunRequest, HttpFlowClient};
use crate::models::{EvaluationReport, FlowRun, RunDetails};
use crate::project::{
    ArtifactStore, DefaultCredential, ProjectClient, ProjectDescriptor, UploadedFile,
    project_endpoint,
};
use crate::scoring::{AzureChatModel, ModelConfig, ScoringModel};
use crate::transform::{
    ANSWER_COLUMN, CONTEXT_COLUMN, QUESTION_COLUMN, TransformSummary, write_responses,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Rows of the flow output shown before transforming
const PREVIEW_ROWS: usize = 10;

/// Everything a finished pipeline produced
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run: FlowRun,
    pub transform: TransformSummary,
    pub report: EvaluationReport,
    pub uploaded: UploadedFile,
}

/// Runs the flow, prepares its output, evaluates it and uploads the report.
///
/// Each stage runs once, in order, and the first error stops the pipeline.
pub struct Pipeline {
    env: EnvConfig,
    settings: Settings,
    flow: Box<dyn FlowClient>,
    scoring: Option<Arc<dyn ScoringModel>>,
    store: Option<Box<dyn ArtifactStore>>,
}

impl Pipeline {
    /// Create a pipeline that talks to the services named by `env` and `settings`
    pub fn new(env: EnvConfig, settings: Settings) -> Self {
        let flow = Box::new(HttpFlowClient::new(settings.flow_endpoint.clone()));
        Self {
            env,
            settings,
            flow,
            scoring: None,
            store: None,
        }
    }

    #[cfg(test)]
    pub fn with_flow_client(mut self, flow: Box<dyn FlowClient>) -> Self {
        self.flow = flow;
        self
    }

    /// Score with `model` instead of the Azure OpenAI deployment from the environment
    #[cfg(test)]
    pub fn with_scoring_model(mut self, model: Arc<dyn ScoringModel>) -> Self {
        self.scoring = Some(model);
        self
    }

    /// Upload to `store` instead of the project from the environment
    #[cfg(test)]
    pub fn with_artifact_store(mut self, store: Box<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        let (run, details) = self.run_flow().await?;
        let transform = self.transform(&details)?;

        let model = self.scoring_model()?;
        let descriptor = match &self.store {
            Some(_) => None,
            None => Some(self.project_descriptor()?),
        };

        let report = self.evaluate(model).await?;
        let uploaded = self.upload(descriptor).await?;

        Ok(PipelineOutcome {
            run,
            transform,
            report,
            uploaded,
        })
    }

    async fn run_flow(&self) -> Result<(FlowRun, RunDetails), PipelineError> {
        let request = FlowRunRequest {
            flow: self.settings.flow_dir.clone(),
            data: self.settings.dataset.clone(),
            column_mapping: ColumnMapping::question_with_empty_history(),
            stream: self.settings.stream,
        };

        let run = self.flow.run(&request).await?;
        let details = self.flow.details(&run).await?;
        self.log_preview(&details);
        Ok((run, details))
    }

    fn log_preview(&self, details: &RunDetails) {
        if details.is_empty() {
            warn!("Flow run produced no rows");
            return;
        }
        for row in details.head(PREVIEW_ROWS) {
            info!(
                line = row.line_number,
                status = ?row.status,
                question = %row.get(QUESTION_COLUMN).cloned().unwrap_or_default(),
                answer = %row.get(ANSWER_COLUMN).cloned().unwrap_or_default(),
                context = %row.get(CONTEXT_COLUMN).cloned().unwrap_or_default(),
                "Run output"
            );
        }
    }

    fn transform(&self, details: &RunDetails) -> Result<TransformSummary, PipelineError> {
        Ok(write_responses(details, &self.settings.responses_path)?)
    }

    fn scoring_model(&self) -> Result<Arc<dyn ScoringModel>, PipelineError> {
        match &self.scoring {
            Some(model) => Ok(model.clone()),
            None => {
                let config = ModelConfig::from_env_config(&self.env)?;
                Ok(Arc::new(AzureChatModel::new(&config)))
            }
        }
    }

    fn project_descriptor(&self) -> Result<ProjectDescriptor, PipelineError> {
        Ok(ProjectDescriptor::from_env_config(
            &self.env,
            Arc::new(DefaultCredential::from_env()),
        )?)
    }

    /// The endpoint is only assembled here, once the report is on disk
    fn project_client(&self, descriptor: ProjectDescriptor) -> Result<ProjectClient, PipelineError> {
        let endpoint = project_endpoint(&self.env)?;
        let client = ProjectClient::new(endpoint, descriptor, self.settings.upload_api_version.clone());

        Ok(match &self.settings.project_api_base {
            Some(api_base) => client.with_api_base(api_base.clone()),
            None => client,
        })
    }

    async fn upload(&self, descriptor: Option<ProjectDescriptor>) -> Result<UploadedFile, PipelineError> {
        let report_path = &self.settings.report_path;
        if let Some(store) = &self.store {
            return Ok(store.upload_file(report_path).await?);
        }

        let descriptor = match descriptor {
            Some(descriptor) => descriptor,
            None => self.project_descriptor()?,
        };
        let client = self.project_client(descriptor)?;
        info!(endpoint = %client.endpoint(), "Connecting to project");
        Ok(client.upload_file(report_path).await?)
    }

    async fn evaluate(&self, model: Arc<dyn ScoringModel>) -> Result<EvaluationReport, PipelineError> {
        let evaluators = quality_evaluators(model);
        let report = evaluate(
            &self.env.evaluation_name(),
            &self.settings.responses_path,
            &evaluators,
            &self.settings.report_path,
        )
        .await?;
        Ok(report)
    }
}
