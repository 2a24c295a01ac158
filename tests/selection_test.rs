//! End-to-end selective testing: index a synthetic project, diff it
//! through a stub VCS, and check the selected set.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use helmsman::domain::errors::PipelineResult;
use helmsman::domain::models::SelectionConfig;
use helmsman::domain::ports::{DiffTarget, Vcs};
use helmsman::services::dependency_graph::DependencyGraphIndexer;
use helmsman::services::selection::{Selection, TestSelector};

struct StubVcs {
    changed: Vec<String>,
}

#[async_trait]
impl Vcs for StubVcs {
    async fn changed_files(&self, _target: &DiffTarget) -> PipelineResult<Vec<String>> {
        Ok(self.changed.clone())
    }

    async fn merge_base(&self, _ref_name: &str) -> PipelineResult<Option<String>> {
        Ok(Some("abc123".to_string()))
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A small instrument-panel project: a widget, its test, a service
/// with its own test, and an always-run smoke suite.
fn scaffold(root: &Path) {
    write(
        root,
        "src/widgets/DepthWidget.tsx",
        "export const DepthWidget = () => null;\n",
    );
    write(
        root,
        "src/widgets/DepthWidget.test.tsx",
        "import { DepthWidget } from './DepthWidget';\n",
    );
    write(
        root,
        "src/services/nmea.ts",
        "export const parse = (s: string) => s;\n",
    );
    write(
        root,
        "src/services/nmea.test.ts",
        "import { parse } from './nmea';\n",
    );
    write(
        root,
        "src/smoke.test.ts",
        "import { parse } from './services/nmea';\n",
    );
}

fn select_for(changed: &[&str]) -> (Selection, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    scaffold(dir.path());

    let config = SelectionConfig::default();
    let indexer = DependencyGraphIndexer::new(config.clone(), dir.path());
    let all_tests = indexer.enumerate_test_files().unwrap();
    let mapping = indexer.build().unwrap();

    let selector = TestSelector::new(config);
    let changed: Vec<String> = changed.iter().map(|s| (*s).to_string()).collect();
    (selector.select(&changed, &mapping, &all_tests), all_tests)
}

#[tokio::test]
async fn test_changed_widget_selects_its_test_and_always_run() {
    let (selection, _all) = select_for(&["src/widgets/DepthWidget.tsx"]);
    let Selection::Subset(selected) = selection else {
        panic!("expected a selective run");
    };

    assert!(selected.contains("src/widgets/DepthWidget.test.tsx"));
    // Always-run smoke suite rides along regardless of the diff.
    assert!(selected.contains("src/smoke.test.ts"));
    // The unrelated service test stays out.
    assert!(!selected.contains("src/services/nmea.test.ts"));
}

#[tokio::test]
async fn test_build_manifest_change_forces_full_run() {
    let (selection, _all) = select_for(&["package.json", "src/widgets/DepthWidget.tsx"]);
    assert_eq!(selection, Selection::Full);
}

#[tokio::test]
async fn test_always_run_present_for_unrelated_change() {
    let (selection, _all) = select_for(&["src/services/nmea.ts"]);
    let Selection::Subset(selected) = selection else {
        panic!("expected a selective run");
    };
    assert!(selected.contains("src/smoke.test.ts"));
    assert!(selected.contains("src/services/nmea.test.ts"));
}

#[tokio::test]
async fn test_mapping_generation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    scaffold(dir.path());

    let indexer = DependencyGraphIndexer::new(SelectionConfig::default(), dir.path());
    let first = indexer.build().unwrap();
    let second = indexer.build().unwrap();

    assert_eq!(first.test_to_sources, second.test_to_sources);
    assert_eq!(first.source_to_tests, second.source_to_tests);
    assert!(first.edge_count() > 0);
}

#[tokio::test]
async fn test_stub_vcs_drives_resolution() {
    let selector = TestSelector::new(SelectionConfig::default());
    let vcs = StubVcs {
        changed: vec!["src/widgets/DepthWidget.tsx".to_string()],
    };
    let target = selector.resolve_diff_target(&vcs, Some("main")).await.unwrap();
    assert_eq!(target, DiffTarget::PullRequestBase("abc123".to_string()));

    let changed = vcs.changed_files(&target).await.unwrap();
    assert_eq!(changed, vec!["src/widgets/DepthWidget.tsx".to_string()]);
}
