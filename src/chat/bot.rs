use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use super::prompt::{build_context, extract_sources, system_message};
use crate::core::config::ChatSettings;
use crate::core::errors::ApiError;
use crate::embedding::Embedder;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::store::{ScoredChunk, VectorStore};

const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub page: Option<u32>,
    /// First 300 characters of the chunk, with "..." when cut.
    pub preview: String,
    pub score: f32,
}

impl SourceRef {
    fn from_hit(hit: &ScoredChunk) -> Self {
        Self {
            source: hit.chunk.source.clone(),
            page: hit.chunk.page,
            preview: preview(&hit.chunk.text, PREVIEW_CHARS),
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub timestamp: String,
}

impl ChatTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            answer: answer.into(),
            sources,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// `text` cut to `max_chars` characters, with "..." appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

type History = Arc<Mutex<VecDeque<ChatTurn>>>;

async fn push_turn(history: &History, turn: ChatTurn, max_history: usize) {
    let mut history = history.lock().await;
    history.push_back(turn);
    while history.len() > max_history.max(1) {
        history.pop_front();
    }
}

/// Retrieve-then-answer over a vector store, with a bounded turn history.
pub struct ChatBot {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    settings: ChatSettings,
    history: History,
}

impl ChatBot {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            settings,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        self.llm.name()
    }

    pub async fn search(&self, question: &str) -> Result<Vec<ScoredChunk>, ApiError> {
        let query = self.embedder.embed_query(question).await?;
        let hits = self
            .store
            .search(&query, self.settings.top_k, self.settings.min_score)
            .await?;
        tracing::debug!("Retrieved {} chunks for question", hits.len());
        Ok(hits)
    }

    /// The request plus the hits the model actually sees.
    fn build_request<'a>(
        &self,
        question: &str,
        hits: &'a [ScoredChunk],
    ) -> (ChatRequest, &'a [ScoredChunk]) {
        let (context, included) = build_context(hits, self.settings.max_context_chars, true);
        tracing::debug!("Context sources: {:?}", extract_sources(&context));
        let request = ChatRequest::new(vec![
            ChatMessage::system(system_message(
                self.settings.system_prompt.as_deref(),
                &context,
            )),
            ChatMessage::user(question),
        ])
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens);
        (request, &hits[..included])
    }

    fn validate(question: &str) -> Result<&str, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("Question must not be empty".to_string()));
        }
        Ok(question)
    }

    pub async fn ask(&self, question: &str) -> Result<ChatTurn, ApiError> {
        let (turn, _) = self.ask_with_hits(question).await?;
        Ok(turn)
    }

    /// Like `ask`, also returning the raw retrieval for callers that show it.
    pub async fn ask_with_hits(
        &self,
        question: &str,
    ) -> Result<(ChatTurn, Vec<ScoredChunk>), ApiError> {
        let question = Self::validate(question)?;
        let hits = self.search(question).await?;
        let (request, cited) = self.build_request(question, &hits);
        let sources = cited.iter().map(SourceRef::from_hit).collect();

        let answer = self.llm.chat(request).await?;
        let turn = ChatTurn::new(question, answer, sources);

        self.record_turn(turn.clone()).await;
        Ok((turn, hits))
    }

    /// Streams the answer. The turn is added to history once the stream ends
    /// cleanly; a failed stream records nothing.
    pub async fn ask_streaming(
        &self,
        question: &str,
    ) -> Result<(Vec<SourceRef>, mpsc::Receiver<Result<String, ApiError>>), ApiError> {
        let question = Self::validate(question)?.to_string();
        let hits = self.search(&question).await?;
        let (request, cited) = self.build_request(&question, &hits);
        let sources: Vec<SourceRef> = cited.iter().map(SourceRef::from_hit).collect();

        let mut upstream = self.llm.stream_chat(request).await?;
        let (tx, rx) = mpsc::channel(32);
        let history = self.history.clone();
        let max_history = self.settings.max_history;
        let turn_sources = sources.clone();

        tokio::spawn(async move {
            let mut answer = String::new();
            while let Some(piece) = upstream.recv().await {
                match piece {
                    Ok(text) => {
                        answer.push_str(&text);
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
            let turn = ChatTurn::new(question, answer.trim(), turn_sources);
            push_turn(&history, turn, max_history).await;
        });

        Ok((sources, rx))
    }

    pub async fn record_turn(&self, turn: ChatTurn) {
        push_turn(&self.history, turn, self.settings.max_history).await;
    }

    pub async fn history(&self) -> Vec<ChatTurn> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::ingest::{Chunk, DocumentKind};
    use crate::store::MemoryVectorStore;

    async fn seeded_store() -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        let texts = [
            ("hr.md", "Annual leave is twenty days."),
            ("fruit.txt", "Apples are sweet and crisp."),
        ];
        let items = texts
            .iter()
            .enumerate()
            .map(|(i, (source, text))| {
                (
                    Chunk {
                        id: format!("c{}", i),
                        text: text.to_string(),
                        source: source.to_string(),
                        kind: DocumentKind::Txt,
                        page: None,
                        chunk_index: 0,
                        start_offset: 0,
                    },
                    vowel_vector(text),
                )
            })
            .collect();
        store.upsert(items).await.unwrap();
        store
    }

    fn bot(store: Arc<MemoryVectorStore>, chat: Arc<ScriptedChat>, settings: ChatSettings) -> ChatBot {
        ChatBot::new(store, Arc::new(VowelEmbedder), chat, settings)
    }

    #[tokio::test]
    async fn ask_grounds_the_prompt_and_records_history() {
        let chat = Arc::new(ScriptedChat::new("You get twenty days."));
        let settings = ChatSettings {
            top_k: 1,
            ..ChatSettings::default()
        };
        let bot = bot(seeded_store().await, chat.clone(), settings);

        let turn = bot.ask("  How much annual leave?  ").await.unwrap();

        assert_eq!(turn.question, "How much annual leave?");
        assert_eq!(turn.answer, "You get twenty days.");
        assert_eq!(turn.sources.len(), 1);
        assert_eq!(bot.history().await.len(), 1);

        let requests = chat.requests.lock().unwrap();
        let system = &requests[0].messages[0];
        assert_eq!(system.role, "system");
        assert!(system.content.contains("[1] (Source: "));
        assert_eq!(requests[0].messages[1].content, "How much annual leave?");
        assert_eq!(requests[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn only_hits_inside_the_context_budget_are_cited() {
        let chat = Arc::new(ScriptedChat::new("Twenty days."));
        let settings = ChatSettings {
            top_k: 2,
            max_context_chars: 100,
            ..ChatSettings::default()
        };
        let bot = bot(seeded_store().await, chat.clone(), settings);

        let (turn, hits) = bot.ask_with_hits("How much annual leave?").await.unwrap();
        let (streamed_sources, _rx) = bot.ask_streaming("How much annual leave?").await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(turn.sources.len(), 1);
        assert_eq!(turn.sources[0].source, hits[0].chunk.source);
        assert_eq!(streamed_sources.len(), 1);
        let system = &chat.requests.lock().unwrap()[0].messages[0].content;
        assert!(system.contains(&hits[0].chunk.source));
        assert!(!system.contains(&hits[1].chunk.source));
    }

    #[tokio::test]
    async fn empty_questions_and_failures_are_not_recorded() {
        let bot = bot(
            seeded_store().await,
            Arc::new(ScriptedChat::failing()),
            ChatSettings::default(),
        );

        assert!(matches!(bot.ask("   ").await, Err(ApiError::BadRequest(_))));
        assert!(matches!(bot.ask("leave?").await, Err(ApiError::Upstream(_))));
        assert!(bot.history().await.is_empty());
    }

    #[tokio::test]
    async fn empty_store_still_asks_the_model() {
        let chat = Arc::new(ScriptedChat::new("I could not find that in the documents."));
        let bot = bot(Arc::new(MemoryVectorStore::new()), chat.clone(), ChatSettings::default());

        let turn = bot.ask("When is the office closed?").await.unwrap();

        assert!(turn.sources.is_empty());
        assert_eq!(chat.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_capped_oldest_first() {
        let settings = ChatSettings {
            max_history: 2,
            ..ChatSettings::default()
        };
        let bot = bot(seeded_store().await, Arc::new(ScriptedChat::new("ok")), settings);

        for question in ["one", "two", "three"] {
            bot.ask(question).await.unwrap();
        }

        let questions: Vec<String> = bot.history().await.into_iter().map(|t| t.question).collect();
        assert_eq!(questions, vec!["two", "three"]);

        bot.clear_history().await;
        assert_eq!(bot.history_len().await, 0);
    }

    #[tokio::test]
    async fn streaming_records_the_full_answer_when_done() {
        let bot = bot(
            seeded_store().await,
            Arc::new(ScriptedChat::new("Twenty days per year.")),
            ChatSettings::default(),
        );

        let (sources, mut rx) = bot.ask_streaming("annual leave?").await.unwrap();
        assert_eq!(sources.len(), 2);

        let mut answer = String::new();
        while let Some(piece) = rx.recv().await {
            answer.push_str(&piece.unwrap());
        }
        assert_eq!(answer, "Twenty days per year.");

        // The sender is dropped only after the turn is pushed.
        assert_eq!(bot.history().await[0].answer, "Twenty days per year.");
    }

    #[tokio::test]
    async fn failed_streams_are_not_recorded() {
        let bot = bot(
            seeded_store().await,
            Arc::new(ScriptedChat::failing()),
            ChatSettings::default(),
        );

        let (_, mut rx) = bot.ask_streaming("annual leave?").await.unwrap();
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
        assert!(bot.history().await.is_empty());
    }

    #[test]
    fn previews_are_cut_at_character_boundaries() {
        assert_eq!(preview("short", 300), "short");
        let long = "休".repeat(301);
        let cut = preview(&long, 300);
        assert_eq!(cut.chars().count(), 303);
        assert!(cut.ends_with("..."));
    }
}
