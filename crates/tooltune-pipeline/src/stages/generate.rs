use crate::artifacts::{ArtifactKind, PipelineArtifact};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use async_trait::async_trait;
use tooltune_dataset::{DatasetBuilder, TRAIN_FILE, VALID_FILE};
use tracing::info;

/// Builds the training dataset in-process and writes both partitions.
#[derive(Debug, Default)]
pub struct GenerateDataOperation;

#[async_trait]
impl ExternalOperation for GenerateDataOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::GenerateData
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let config = ctx.config;
        let data_dir = ctx.layout.data_dir();

        let split = DatasetBuilder::from_sources(&config.tools_path, &config.examples_path)
            .with_options(config.dataset.split_options())
            .build_and_write(&data_dir)
            .map_err(|e| Diagnostic::new(format!("dataset generation failed: {e}")))?;

        let id = split.id().map_err(|e| Diagnostic::new(e.to_string()))?;
        info!(dataset_id = %id, train = split.train.len(), valid = split.valid.len(), "dataset ready");

        Ok(vec![
            PipelineArtifact::new(ArtifactKind::DatasetDir, &data_dir),
            PipelineArtifact::new(ArtifactKind::DatasetJsonl, data_dir.join(TRAIN_FILE)),
            PipelineArtifact::new(ArtifactKind::DatasetJsonl, data_dir.join(VALID_FILE)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::fs::StdFileSystem;
    use crate::layout::PipelineLayout;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_generates_partitions_without_commands() {
        let temp = TempDir::new().unwrap();
        let tools = temp.path().join("tools.json");
        let examples = temp.path().join("examples.json");
        std::fs::write(&tools, r#"[{"name":"calculate","description":"Math"}]"#).unwrap();
        std::fs::write(
            &examples,
            r#"[{"userQuery":"a","expectedToolCalls":[{"name":"calculate","arguments":{"expression":"1"}}]},
                {"userQuery":"b","expectedToolCalls":[{"name":"calculate","arguments":{"expression":"2"}}]}]"#,
        )
        .unwrap();

        let config = PipelineConfig { tools_path: tools, examples_path: examples, ..PipelineConfig::default() };
        let layout = PipelineLayout::new(temp.path().join("out"));
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let artifacts = GenerateDataOperation.invoke(&ctx).await.unwrap();
        assert_eq!(artifacts.len(), 3);
        assert!(layout.data_dir().join(TRAIN_FILE).is_file());
        assert!(layout.data_dir().join(VALID_FILE).is_file());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_with_diagnostic() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig {
            tools_path: temp.path().join("missing"),
            examples_path: temp.path().join("missing.json"),
            ..PipelineConfig::default()
        };
        let layout = PipelineLayout::new(temp.path().join("out"));
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let diag = GenerateDataOperation.invoke(&ctx).await.unwrap_err();
        assert!(diag.message.contains("dataset generation failed"));
        assert!(!layout.data_dir().exists());
    }
}
