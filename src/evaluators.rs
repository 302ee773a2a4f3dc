use crate::error::ScoringError;
use crate::models::RunRecord;
use crate::scoring::ScoringModel;
use async_trait::async_trait;
use std::sync::Arc;

/// Scores one record along a single dimension
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Key of the produced score, e.g. `gpt_fluency`
    fn metric(&self) -> &'static str;

    /// `Ok(None)` when the model answered without a usable score
    async fn evaluate(&self, record: &RunRecord) -> Result<Option<f64>, ScoringError>;
}

/// The dimensions a [`QualityEvaluator`] can rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Fluency,
    Groundedness,
    Relevance,
    Coherence,
}

impl Quality {
    pub const ALL: [Quality; 4] = [
        Quality::Fluency,
        Quality::Groundedness,
        Quality::Relevance,
        Quality::Coherence,
    ];

    /// Evaluator name as it appears in the report
    pub fn name(self) -> &'static str {
        match self {
            Quality::Fluency => "Fluency",
            Quality::Groundedness => "Groundedness",
            Quality::Relevance => "Relevance",
            Quality::Coherence => "Coherence",
        }
    }

    pub fn metric(self) -> &'static str {
        match self {
            Quality::Fluency => "gpt_fluency",
            Quality::Groundedness => "gpt_groundedness",
            Quality::Relevance => "gpt_relevance",
            Quality::Coherence => "gpt_coherence",
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            Quality::Fluency => FLUENCY_INSTRUCTIONS,
            Quality::Groundedness => GROUNDEDNESS_INSTRUCTIONS,
            Quality::Relevance => RELEVANCE_INSTRUCTIONS,
            Quality::Coherence => COHERENCE_INSTRUCTIONS,
        }
    }

    fn user_prompt(self, record: &RunRecord) -> String {
        match self {
            Quality::Fluency | Quality::Coherence => format!(
                "question: {}\nanswer: {}\nstars:",
                record.question, record.answer
            ),
            Quality::Groundedness => format!(
                "CONTEXT: {}\nANSWER: {}\nstars:",
                record.context, record.answer
            ),
            Quality::Relevance => format!(
                "context: {}\nquestion: {}\nanswer: {}\nstars:",
                record.context, record.question, record.answer
            ),
        }
    }
}

const RATING_FOOTER: &str =
    "Reply with a single integer from 1 to 5 and nothing else. 1 is the worst rating, 5 the best.";

const FLUENCY_INSTRUCTIONS: &str = "You rate the fluency of an answer to a question. Fluency \
measures the quality of individual sentences: whether they are well written and grammatically \
correct, independent of whether the answer is right.";

const GROUNDEDNESS_INSTRUCTIONS: &str = "You decide whether an ANSWER is supported by the given \
CONTEXT. A fully grounded answer makes only claims that follow from the context; an answer that \
contradicts the context or adds facts absent from it is ungrounded.";

const RELEVANCE_INSTRUCTIONS: &str = "You rate how relevant an answer is to a question, given \
the context the answer was produced from. A relevant answer addresses the main aspects of the \
question using the important information in the context.";

const COHERENCE_INSTRUCTIONS: &str = "You rate the coherence of an answer to a question. A \
coherent answer reads as a whole: its sentences fit together, follow a logical order, and \
stay on topic.";

/// Prompt-based evaluator that asks a chat model for a 1-5 rating
pub struct QualityEvaluator {
    quality: Quality,
    model: Arc<dyn ScoringModel>,
    system_prompt: String,
}

impl QualityEvaluator {
    pub fn new(quality: Quality, model: Arc<dyn ScoringModel>) -> Self {
        Self {
            quality,
            model,
            system_prompt: format!("{}\n\n{}", quality.instructions(), RATING_FOOTER),
        }
    }
}

#[async_trait]
impl Evaluator for QualityEvaluator {
    fn metric(&self) -> &'static str {
        self.quality.metric()
    }

    async fn evaluate(&self, record: &RunRecord) -> Result<Option<f64>, ScoringError> {
        let prompt = self.quality.user_prompt(record);
        let reply = self.model.complete(&self.system_prompt, &prompt).await?;
        Ok(parse_score(&reply))
    }
}

/// The four quality evaluators, named for the report, all bound to `model`
pub fn quality_evaluators(model: Arc<dyn ScoringModel>) -> Vec<(String, Arc<dyn Evaluator>)> {
    Quality::ALL
        .iter()
        .map(|&quality| {
            let evaluator: Arc<dyn Evaluator> =
                Arc::new(QualityEvaluator::new(quality, model.clone()));
            (quality.name().to_string(), evaluator)
        })
        .collect()
}

/// First digit in the reply, if any
pub fn parse_score(reply: &str) -> Option<f64> {
    reply
        .chars()
        .find(|c| c.is_ascii_digit())
        .and_then(|c| c.to_digit(10))
        .map(f64::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records prompts and answers with a canned reply
    struct CannedModel {
        reply: String,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl CannedModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScoringModel for CannedModel {
        async fn complete(&self, system: &str, user: &str) -> Result<String, ScoringError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok(self.reply.clone())
        }
    }

    fn record() -> RunRecord {
        RunRecord {
            question: "What does the borrow checker do?".to_string(),
            chat_history: vec![],
            answer: "It enforces ownership rules at compile time.".to_string(),
            context: "The borrow checker validates references.".to_string(),
        }
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("4"), Some(4.0));
        assert_eq!(parse_score("Rating: 5 stars"), Some(5.0));
        assert_eq!(parse_score(" 3\n"), Some(3.0));
        assert_eq!(parse_score("no idea"), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn test_names_and_metrics() {
        let names: Vec<_> = Quality::ALL.iter().map(|q| q.name()).collect();
        assert_eq!(names, ["Fluency", "Groundedness", "Relevance", "Coherence"]);
        assert_eq!(Quality::Groundedness.metric(), "gpt_groundedness");
    }

    #[tokio::test]
    async fn test_groundedness_prompt_uses_context_and_answer() {
        let model = Arc::new(CannedModel::new("5"));
        let evaluator = QualityEvaluator::new(Quality::Groundedness, model.clone());

        let score = evaluator.evaluate(&record()).await.unwrap();
        assert_eq!(score, Some(5.0));

        let prompts = model.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.contains("CONTEXT"));
        assert!(system.contains("single integer from 1 to 5"));
        assert!(user.contains("The borrow checker validates references."));
        assert!(user.contains("It enforces ownership rules"));
        assert!(!user.contains("What does the borrow checker do?"));
    }

    #[tokio::test]
    async fn test_fluency_prompt_omits_context() {
        let model = Arc::new(CannedModel::new("3"));
        let evaluator = QualityEvaluator::new(Quality::Fluency, model.clone());
        evaluator.evaluate(&record()).await.unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].1.contains("What does the borrow checker do?"));
        assert!(!prompts[0].1.contains("validates references"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_gives_no_score() {
        let model = Arc::new(CannedModel::new("I cannot rate this."));
        let evaluator = QualityEvaluator::new(Quality::Coherence, model);
        assert_eq!(evaluator.evaluate(&record()).await.unwrap(), None);
    }

    #[test]
    fn test_quality_evaluators_share_model() {
        let model: Arc<dyn ScoringModel> = Arc::new(CannedModel::new("1"));
        let evaluators = quality_evaluators(model.clone());

        assert_eq!(evaluators.len(), 4);
        assert_eq!(evaluators[0].0, "Fluency");
        assert_eq!(evaluators[3].1.metric(), "gpt_coherence");
        // one handle held here plus one per evaluator
        assert_eq!(Arc::strong_count(&model), 5);
    }
}
