use crate::{
    answer::AnswerClient,
    error::{ApiError, ApiResult},
    store::Store,
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskOutcome {
    pub answer: String,
    pub chat_id: String,
}

/// Runs one query: ask the answer service, then record the exchange.
#[derive(Clone)]
pub struct Asker {
    store: Store,
    answers: AnswerClient,
}

impl Asker {
    pub fn new(store: Store, answers: AnswerClient) -> Self {
        Self { store, answers }
    }

    /// `chat_id` of `None` (or an empty string) starts a new chat. A chat
    /// that is missing or belongs to someone else is `NotFound`.
    pub async fn ask(
        &self,
        user_id: &str,
        query: Option<&str>,
        chat_id: Option<&str>,
    ) -> ApiResult<AskOutcome> {
        let query = query
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Query is required.".to_string()))?;
        let chat_id = chat_id.filter(|id| !id.is_empty());

        info!("Forwarding query to answer service: {:?}", query);
        let answer = self.answers.ask(query).await?;
        info!("Received answer from answer service");

        let chat_id = self
            .store
            .append_exchange(chat_id, user_id, query, &answer)
            .await?;
        info!("Exchange saved to chat {}", chat_id);

        Ok(AskOutcome { answer, chat_id })
    }
}
