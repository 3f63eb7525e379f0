//! The named processing stages of a connection.
//!
//! 连接的命名处理阶段。

use super::{chunked::ChunkedWriter, tls::TlsStage};
use std::sync::Arc;

/// The name under which a connector installs its TLS stage.
pub const TLS_STAGE: &str = "tls";
/// The name under which a connector installs its chunked writer stage.
pub const CHUNKED_WRITER_STAGE: &str = "chunked";

/// A single stage in a connection's pipeline.
///
/// 连接管道中的单个阶段。
#[derive(Debug, Clone)]
pub enum Stage {
    /// The TLS session, exposing its handshake outcome.
    /// TLS会话，公开其握手结果。
    Tls(TlsStage),
    /// The pull-based writer that frames outbound chunks.
    /// 对出站分块进行分帧的拉取式写入器。
    ChunkedWriter(Arc<dyn ChunkedWriter>),
    /// A stage this crate does not interpret, identified by its kind.
    Custom(String),
}

/// An ordered list of named stages.
///
/// Stages are looked up by name (the TLS stage) or by kind (the chunked
/// writer, which may be installed under any name).
///
/// 命名阶段的有序列表。
///
/// 阶段可以按名称查找（TLS阶段），也可以按类型查找（分块写入器可以安装在任意名称下）。
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<(String, Stage)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage, replacing any existing stage with the same name.
    ///
    /// 追加一个阶段，替换任何同名的现有阶段。
    pub fn add_last(&mut self, name: impl Into<String>, stage: Stage) -> &mut Self {
        let name = name.into();
        self.stages.retain(|(existing, _)| *existing != name);
        self.stages.push((name, stage));
        self
    }

    /// Builder form of [`Pipeline::add_last`].
    pub fn with(mut self, name: impl Into<String>, stage: Stage) -> Self {
        self.add_last(name, stage);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, stage)| stage)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the TLS stage if the stage named [`TLS_STAGE`] is one.
    ///
    /// 如果名为 [`TLS_STAGE`] 的阶段是TLS阶段，则返回它。
    pub fn tls(&self) -> Option<&TlsStage> {
        match self.get(TLS_STAGE) {
            Some(Stage::Tls(tls)) => Some(tls),
            _ => None,
        }
    }

    /// Returns the first chunked writer in pipeline order.
    ///
    /// 按管道顺序返回第一个分块写入器。
    pub fn chunked_writer(&self) -> Option<Arc<dyn ChunkedWriter>> {
        self.stages.iter().find_map(|(_, stage)| match stage {
            Stage::ChunkedWriter(writer) => Some(writer.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockChunkedWriter;

    #[test]
    fn test_lookup_by_name_and_kind() {
        let writer = Arc::new(MockChunkedWriter::new());
        let (tls, _signal) = TlsStage::pending();
        let pipeline = Pipeline::new()
            .with(TLS_STAGE, Stage::Tls(tls))
            .with("logging", Stage::Custom("logging".into()))
            .with("writer", Stage::ChunkedWriter(writer));

        assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["tls", "logging", "writer"]);
        assert!(pipeline.tls().is_some());
        // The chunked writer is found regardless of the name it was installed under.
        assert!(pipeline.chunked_writer().is_some());
        assert!(matches!(pipeline.get("logging"), Some(Stage::Custom(_))));
    }

    #[test]
    fn test_tls_lookup_requires_tls_kind() {
        let pipeline = Pipeline::new().with(TLS_STAGE, Stage::Custom("not-tls".into()));
        assert!(pipeline.get(TLS_STAGE).is_some());
        assert!(pipeline.tls().is_none());
        assert!(pipeline.chunked_writer().is_none());
    }

    #[test]
    fn test_add_last_replaces_same_name() {
        let mut pipeline = Pipeline::new();
        pipeline.add_last("a", Stage::Custom("first".into()));
        pipeline.add_last("b", Stage::Custom("b".into()));
        pipeline.add_last("a", Stage::Custom("second".into()));
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(matches!(pipeline.get("a"), Some(Stage::Custom(kind)) if kind == "second"));
    }
}
