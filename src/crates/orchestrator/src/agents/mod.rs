//! Agent behaviors.
//!
//! All agents share one capability set: prepare retrieval queries, build a
//! prompt, parse the structured output, validate it. Concrete kinds
//! differ only by the declaration returned from [`behavior`], keeping the
//! runtime generic over kinds.

pub mod parse;
pub mod runtime;
pub mod validate;

pub use runtime::{AgentContext, AgentOutcome, AgentRuntime};

use crate::registry::AgentKind;
use crate::state::AnalysisState;
use retrieval::RetrievalStrategy;

/// Declarative behavior of one agent kind.
pub struct AgentBehavior {
    /// System prompt for the LLM call.
    pub system_prompt: &'static str,

    /// Task instructions appended after context and excerpts.
    pub instructions: &'static str,

    /// Top-level JSON key the structured output must carry.
    pub output_key: &'static str,

    /// Retrieval strategy for this kind.
    pub strategy: RetrievalStrategy,

    /// Default retrieval k.
    pub k: usize,
}

/// Retrieval queries for one agent invocation. The user task is appended
/// when present so retrieval tracks what was actually asked.
pub fn queries(kind: AgentKind, state: &AnalysisState) -> Vec<String> {
    let mut queries: Vec<String> = match kind {
        AgentKind::DocumentClassifier => {
            vec!["тип документа назначение сторон".into()]
        }
        AgentKind::EntityExtraction => vec![
            "стороны участники организации лица".into(),
            "суммы платежи реквизиты".into(),
        ],
        AgentKind::Timeline => vec![
            "даты сроки события хронология".into(),
            "подписание исполнение оплата".into(),
        ],
        AgentKind::KeyFacts => vec!["ключевые факты обязательства условия".into()],
        AgentKind::Discrepancy => vec![
            "противоречия расхождения несоответствия".into(),
            "условия сроки суммы в разных документах".into(),
        ],
        AgentKind::Risk => vec!["риски ответственность штрафы неустойка".into()],
        AgentKind::Summary => vec!["предмет спора основные обстоятельства".into()],
        AgentKind::PrivilegeCheck => {
            vec!["адвокатская тайна юридическая консультация переписка с юристом".into()]
        }
        AgentKind::Relationship => vec!["связи между сторонами договорные отношения".into()],
        AgentKind::TabularExtract => vec![],
        AgentKind::DraftEditor => vec!["формулировки положения разделы".into()],
        AgentKind::DeepReason => vec!["правовая позиция аргументы обоснование".into()],
    };

    if let Some(task) = &state.user_task {
        queries.push(task.clone());
    }
    queries
}

/// The declaration table.
pub fn behavior(kind: AgentKind) -> AgentBehavior {
    match kind {
        AgentKind::DocumentClassifier => AgentBehavior {
            system_prompt: "Ты классификатор юридических документов. Отвечай только валидным JSON.",
            instructions: "Классифицируй каждый документ: тип (договор, акт, претензия, переписка, \
                           судебный документ, иное), краткое назначение, и флаг is_privileged для \
                           документов, защищённых адвокатской тайной. \
                           Верни JSON: {\"classifications\": [{\"document\", \"doc_type\", \
                           \"purpose\", \"is_privileged\", \"source\"}]}",
            output_key: "classifications",
            strategy: RetrievalStrategy::Simple,
            k: 10,
        },
        AgentKind::EntityExtraction => AgentBehavior {
            system_prompt: "Ты извлекаешь сущности из юридических документов. Отвечай только валидным JSON.",
            instructions: "Извлеки сущности: людей, организации, суммы, реквизиты. Для каждой укажи \
                           тип, значение и источник. \
                           Верни JSON: {\"entities\": [{\"entity_type\", \"value\", \"source\"}]}",
            output_key: "entities",
            strategy: RetrievalStrategy::Hybrid,
            k: 8,
        },
        AgentKind::Timeline => AgentBehavior {
            system_prompt: "Ты строишь хронологию событий по юридическим документам. Отвечай только валидным JSON.",
            instructions: "Извлеки все события с датами. Каждое событие: дата, описание, источник. \
                           Верни JSON: {\"events\": [{\"date\", \"description\", \"source\"}]}",
            output_key: "events",
            strategy: RetrievalStrategy::Hybrid,
            k: 8,
        },
        AgentKind::KeyFacts => AgentBehavior {
            system_prompt: "Ты извлекаешь ключевые факты из юридических документов. Отвечай только валидным JSON.",
            instructions: "Извлеки ключевые факты дела: обязательства, условия, суммы, сроки. \
                           Верни JSON: {\"facts\": [{\"fact\", \"category\", \"source\"}]}",
            output_key: "facts",
            strategy: RetrievalStrategy::Hybrid,
            k: 8,
        },
        AgentKind::Discrepancy => AgentBehavior {
            system_prompt: "Ты ищешь противоречия между юридическими документами. Отвечай только валидным JSON.",
            instructions: "Найди противоречия между документами: расхождения в датах, суммах, \
                           условиях. Каждое противоречие должно ссылаться на два разных документа. \
                           Если противоречий нет, верни пустой список. \
                           Верни JSON: {\"discrepancies\": [{\"description\", \"document_a\", \
                           \"document_b\", \"severity\"}]}",
            output_key: "discrepancies",
            strategy: RetrievalStrategy::MultiQuery,
            k: 12,
        },
        AgentKind::Risk => AgentBehavior {
            system_prompt: "Ты анализируешь юридические риски. Отвечай только валидным JSON.",
            instructions: "На основе найденных противоречий и документов оцени риски. Каждый риск: \
                           описание, уровень (critical/high/medium/low), обоснование, источник. \
                           Верни JSON: {\"risks\": [{\"description\", \"level\", \"rationale\", \
                           \"source\"}]}",
            output_key: "risks",
            strategy: RetrievalStrategy::Hybrid,
            k: 10,
        },
        AgentKind::Summary => AgentBehavior {
            system_prompt: "Ты составляешь резюме юридического дела. Отвечай только валидным JSON.",
            instructions: "На основе ключевых фактов составь связное резюме дела: предмет, стороны, \
                           ключевые обстоятельства, текущий статус. \
                           Верни JSON: {\"summary\": \"...\", \"highlights\": [\"...\"]}",
            output_key: "summary",
            strategy: RetrievalStrategy::Simple,
            k: 6,
        },
        AgentKind::PrivilegeCheck => AgentBehavior {
            system_prompt: "Ты проверяешь документы на адвокатскую тайну. Отвечай только валидным JSON.",
            instructions: "Определи, какие документы защищены адвокатской тайной или являются \
                           юридической консультацией. \
                           Верни JSON: {\"privileged_documents\": [{\"document\", \"reason\", \
                           \"source\"}]}",
            output_key: "privileged_documents",
            strategy: RetrievalStrategy::Simple,
            k: 10,
        },
        AgentKind::Relationship => AgentBehavior {
            system_prompt: "Ты строишь граф связей между участниками дела. Отвечай только валидным JSON.",
            instructions: "На основе извлечённых сущностей опиши связи между участниками: кто с кем \
                           связан договором, платежом, перепиской. \
                           Верни JSON: {\"relations\": [{\"from\", \"to\", \"relation\", \"source\"}]}",
            output_key: "relations",
            strategy: RetrievalStrategy::Simple,
            k: 8,
        },
        AgentKind::TabularExtract => AgentBehavior {
            system_prompt: "Ты извлекаешь структурированные данные из документов. Отвечай только валидным JSON.",
            instructions: "",
            output_key: "cells",
            strategy: RetrievalStrategy::Simple,
            k: 5,
        },
        AgentKind::DraftEditor => AgentBehavior {
            system_prompt: "Ты редактируешь юридические тексты. Отвечай только валидным JSON.",
            instructions: "Подготовь отредактированный фрагмент документа по задаче пользователя, \
                           с опорой на приведённые выдержки. \
                           Верни JSON: {\"draft\": \"...\", \"notes\": [\"...\"]}",
            output_key: "draft",
            strategy: RetrievalStrategy::Simple,
            k: 6,
        },
        AgentKind::DeepReason => AgentBehavior {
            system_prompt: "Ты выполняешь глубокий юридический анализ. Отвечай только валидным JSON.",
            instructions: "Проанализируй правовую позицию по задаче пользователя: аргументы, \
                           контраргументы, выводы. Каждый вывод со ссылкой на источник. \
                           Верни JSON: {\"analysis\": \"...\", \"conclusions\": [{\"conclusion\", \
                           \"source\"}]}",
            output_key: "analysis",
            strategy: RetrievalStrategy::Iterative,
            k: 12,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_behavior() {
        for kind in AgentKind::ALL {
            let behavior = behavior(kind);
            assert!(!behavior.output_key.is_empty(), "{kind} missing output key");
            assert!(behavior.k > 0);
        }
    }

    #[test]
    fn test_queries_include_user_task() {
        let mut state = AnalysisState::new("C1", "u1");
        state.user_task = Some("Извлеки ключевые даты".into());
        let queries = queries(AgentKind::Timeline, &state);
        assert!(queries.iter().any(|q| q.contains("ключевые даты")));
    }
}
