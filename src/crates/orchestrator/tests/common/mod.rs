//! Shared test harness: scripted models, a static corpus, in-memory
//! persistence.

use lexgraph_checkpoint::InMemoryCheckpointSaver;
use lexgraph_core::store::InMemoryStore;
use llm::ScriptedChatModel;
use orchestrator::{AnalysisEngine, EngineConfig, Services};
use retrieval::{DocumentMetadata, RetrievedDocument, StaticRetriever};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

pub struct Harness {
    pub engine: AnalysisEngine,
    pub lite: Arc<ScriptedChatModel>,
    pub pro: Arc<ScriptedChatModel>,
    pub store: Arc<InMemoryStore>,
    pub checkpointer: Arc<InMemoryCheckpointSaver>,
    pub retriever: Arc<StaticRetriever>,
}

/// Surface `tracing` output on test failure; `RUST_LOG` filters it.
/// `try_init` so parallel tests racing the global subscriber stay quiet.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn doc(id: &str, content: &str) -> RetrievedDocument {
    RetrievedDocument::new(
        content,
        DocumentMetadata {
            doc_id: id.into(),
            name: format!("{id}.pdf"),
            page: Some(1),
            ..Default::default()
        },
        0.0,
    )
}

/// Three-document case used across scenarios.
pub async fn default_corpus(retriever: &StaticRetriever) {
    retriever
        .load_case(
            "C1",
            vec![
                doc("d1", "Договор поставки подписан 20 сентября 2023 года, сумма 500000 рублей"),
                doc("d2", "Акт приема-передачи товара подписан 05.10.2023"),
                doc("d3", "Претензия о нарушении сроков поставки направлена 01.11.2023"),
            ],
        )
        .await;
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        base_retry_delay: Duration::from_millis(10),
        agent_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    init_tracing();

    let retriever = Arc::new(StaticRetriever::new());
    default_corpus(&retriever).await;

    let lite = Arc::new(ScriptedChatModel::new("scripted-lite").with_fallback(fallback_reply()));
    let pro = Arc::new(ScriptedChatModel::new("scripted-pro").with_fallback(fallback_reply()));
    let store = Arc::new(InMemoryStore::new());
    let checkpointer = Arc::new(InMemoryCheckpointSaver::new());

    let engine = AnalysisEngine::new(
        Services {
            retriever: retriever.clone(),
            llm_lite: lite.clone(),
            llm_pro: pro.clone(),
            store: store.clone(),
            checkpointer: checkpointer.clone(),
        },
        config,
    );

    Harness {
        engine,
        lite,
        pro,
        store,
        checkpointer,
        retriever,
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

/// One reply that satisfies every agent's output key, for calls the test
/// did not script explicitly. Parallel workers pop the scripted queue in
/// nondeterministic order, so fan-out tests rely on this shape.
pub fn fallback_reply() -> String {
    serde_json::json!({
        "events": [
            {"date": "2023-09-20", "description": "подписание договора", "source": "[doc:d1.pdf, p.1]"},
            {"date": "2023-10-05", "description": "приемка товара", "source": "[doc:d2.pdf, p.1]"},
            {"date": "2023-11-01", "description": "претензия", "source": "[doc:d3.pdf, p.1]"},
        ],
        "facts": [
            {"fact": "сумма договора 500000 рублей", "category": "financial", "source": "[doc:d1.pdf, p.1]"},
            {"fact": "товар принят", "category": "performance", "source": "[doc:d2.pdf, p.1]"},
            {"fact": "сроки нарушены", "category": "breach", "source": "[doc:d3.pdf, p.1]"},
        ],
        "entities": [
            {"entity_type": "amount", "value": "500000 рублей", "source": "[doc:d1.pdf, p.1]"},
            {"entity_type": "document", "value": "договор поставки", "source": "[doc:d1.pdf, p.1]"},
            {"entity_type": "document", "value": "акт приема-передачи", "source": "[doc:d2.pdf, p.1]"},
        ],
        "discrepancies": [
            {"description": "дата поставки в договоре и акте расходится", "document_a": "d1.pdf",
             "document_b": "d2.pdf", "severity": "medium", "source": "[doc:d1.pdf, p.1]"},
            {"description": "сумма в претензии не совпадает с договором", "document_a": "d1.pdf",
             "document_b": "d3.pdf", "severity": "low", "source": "[doc:d3.pdf, p.1]"},
            {"description": "срок оплаты указан по-разному", "document_a": "d2.pdf",
             "document_b": "d3.pdf", "severity": "low", "source": "[doc:d2.pdf, p.1]"},
        ],
        "risks": [
            {"description": "неустойка за просрочку", "level": "high",
             "rationale": "претензия уже направлена", "source": "[doc:d3.pdf, p.1]"},
            {"description": "спор о сумме", "level": "medium",
             "rationale": "расхождение сумм", "source": "[doc:d1.pdf, p.1]"},
            {"description": "риск расторжения", "level": "low",
             "rationale": "на основании претензии", "source": "[doc:d3.pdf, p.1]"},
        ],
        "summary": "Спор о нарушении сроков поставки по договору от 20.09.2023 на 500000 рублей.",
        "highlights": ["претензия направлена", "сроки нарушены"],
        "classifications": [
            {"document": "d1.pdf", "doc_type": "договор", "purpose": "поставка",
             "is_privileged": false, "source": "[doc:d1.pdf, p.1]"},
            {"document": "d2.pdf", "doc_type": "акт", "purpose": "приемка",
             "is_privileged": false, "source": "[doc:d2.pdf, p.1]"},
            {"document": "d3.pdf", "doc_type": "претензия", "purpose": "досудебный порядок",
             "is_privileged": false, "source": "[doc:d3.pdf, p.1]"},
        ],
        "relations": [
            {"from": "Поставщик", "to": "Покупатель", "relation": "договор поставки",
             "source": "[doc:d1.pdf, p.1]"},
        ],
        "privileged_documents": [],
        "analysis": "Анализ правовой позиции по спору о поставке.",
        "conclusions": [{"conclusion": "позиция покупателя сильнее", "source": "[doc:d3.pdf, p.1]"}],
        "draft": "Проект ответа на претензию.",
        "notes": [],
        "steps": [],
        "value": null
    })
    .to_string()
}

/// Drain a run's event stream into a vector.
pub async fn collect_events(stream: lexgraph_core::stream::EventStream) -> Vec<Value> {
    stream.collect().await
}

pub fn events_of_type<'a>(events: &'a [Value], event_type: &str) -> Vec<&'a Value> {
    events
        .iter()
        .filter(|e| e["type"] == event_type)
        .collect()
}
