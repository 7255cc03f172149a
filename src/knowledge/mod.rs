//! 知识检索：外部语义检索协作方
//!
//! 支持 search(query, k)；空结果合法。实现：
//! - `InMemoryKnowledge`：按关键词重叠检索（离线语料）
//! - `HttpKnowledgeSearch`：POST {query, top_k} 到检索服务
//! - `NoopKnowledge`：未配置检索时使用

pub mod trigger;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ControllerError;

pub use trigger::KnowledgeTrigger;

/// 检索结果片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// 按相关度降序返回至多 k 条
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, ControllerError>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

#[derive(Clone, Default)]
pub struct NoopKnowledge;

#[async_trait]
impl KnowledgeSearch for NoopKnowledge {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Snippet>, ControllerError> {
        Ok(Vec::new())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// 将文本切分为小写词集合（去标点，长度 > 1）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 内存知识库：(文本, 词集合)，相关度为查询词覆盖率
#[derive(Clone)]
pub struct InMemoryKnowledge {
    store: Arc<RwLock<Vec<(String, HashSet<String>)>>>,
    max_entries: usize,
}

impl InMemoryKnowledge {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let tokens = tokenize_lower(text);
        if let Ok(mut store) = self.store.write() {
            store.push((text.to_string(), tokens));
            let n = store.len();
            if n > self.max_entries {
                store.drain(0..n - self.max_entries);
            }
        }
    }

    /// 从纯文本语料加载：空行分隔条目
    pub fn load_corpus(&self, path: &Path) -> Result<usize, ControllerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Config(format!("failed to read corpus {}: {}", path.display(), e))
        })?;
        let mut count = 0;
        for entry in text.split("\n\n") {
            if !entry.trim().is_empty() {
                self.add(entry);
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKnowledge {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl KnowledgeSearch for InMemoryKnowledge {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, ControllerError> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let store = self
            .store
            .read()
            .map_err(|_| ControllerError::transient("knowledge", "store lock poisoned"))?;
        let mut scored: Vec<Snippet> = store
            .iter()
            .map(|(text, doc_tokens)| Snippet {
                text: text.clone(),
                score: query_tokens.intersection(doc_tokens).count() as f32
                    / query_tokens.len() as f32,
            })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

/// HTTP 检索服务客户端：POST {endpoint} body {query, top_k}，响应 {results: [{text, score}]}
pub struct HttpKnowledgeSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpKnowledgeSearch {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, ControllerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("shadow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ControllerError::Config(format!("knowledge http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, ControllerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest { query, top_k: k })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ControllerError::transient("knowledge", "request timed out")
                } else {
                    ControllerError::transient("knowledge", e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::transient(
                "knowledge",
                format!("HTTP {}", status),
            ));
        }
        let body: SearchResponse = response.json().await.map_err(|e| {
            ControllerError::MalformedResponse {
                role: "knowledge".to_string(),
                reason: e.to_string(),
                raw: String::new(),
            }
        })?;
        let mut results = body.results;
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_in_memory_ranks_by_overlap() {
        let kb = InMemoryKnowledge::default();
        kb.add("SQL injection login bypass with ' or 1=1 -- payloads");
        kb.add("Directory brute force with gobuster and common wordlists");
        kb.add("SSTI in jinja2 templates: {{7*7}}");
        let hits = kb.search("login sql injection logic", 2).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].text.contains("SQL injection"));
        assert!(hits.len() <= 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let kb = InMemoryKnowledge::default();
        assert!(kb.search("anything", 3).await.unwrap().is_empty());
        assert!(NoopKnowledge.search("x", 3).await.unwrap().is_empty());
        assert!(!NoopKnowledge.enabled());
    }

    #[test]
    fn test_load_corpus_splits_on_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first entry\nline two\n\nsecond entry\n\n\n").unwrap();
        let kb = InMemoryKnowledge::default();
        assert_eq!(kb.load_corpus(file.path()).unwrap(), 2);
        assert_eq!(kb.len(), 2);
    }

    #[test]
    fn test_max_entries_evicts_oldest() {
        let kb = InMemoryKnowledge::new(2);
        kb.add("a1 alpha");
        kb.add("b2 beta");
        kb.add("c3 gamma");
        assert_eq!(kb.len(), 2);
    }
}
