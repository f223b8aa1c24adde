mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use onboard_core::types::FileStatus;
use onboard_pipeline::plugin::RemoteEndpoint;
use onboard_pipeline::processor::PipelineOptions;
use onboard_pipeline::registry::{instantiate_one, PluginSettings, Registry};
use onboard_worker::poller::{poll_remote, run_remote, RemoteProduct};
use onboard_worker::remote::MountedRemote;

use common::AcceptingDb;

const VALID: &str = "olm_id_FASTAG_ACQ_20240131.csv";
const HEADER: &str = "meta.product,meta.submitted_by,meta.jira,meta.operation,plaza.plaza_id,plaza.name";

struct Setup {
    _tmp: tempfile::TempDir,
    remote_root: PathBuf,
    registry: Registry,
    remote: RemoteProduct,
    options: PipelineOptions,
}

async fn setup() -> Setup {
    let tmp = tempfile::tempdir().unwrap();
    let remote_root = tmp.path().join("remote");

    let mut registry = Registry::new(tmp.path().join("local"));
    let plugin = instantiate_one("FASTAG_ACQ", &PluginSettings::default()).unwrap();
    registry.register(plugin, Box::new(AcceptingDb::default())).await.unwrap();

    let remote = RemoteProduct {
        code: "FASTAG_ACQ",
        endpoint: RemoteEndpoint {
            root: remote_root.to_string_lossy().into_owned(),
        },
        transfer: Box::new(MountedRemote::new(Duration::from_secs(5))),
    };
    remote.connect().await.unwrap();

    let options = PipelineOptions {
        sql_dir: tmp.path().join("sqlqueries"),
        row_timeout: Some(Duration::from_secs(5)),
    };
    Setup {
        _tmp: tmp,
        remote_root,
        registry,
        remote,
        options,
    }
}

fn put(root: &Path, dir: &str, name: &str, contents: &str) {
    std::fs::write(root.join(dir).join(name), contents).unwrap();
}

fn remote_location(root: &Path, name: &str) -> Vec<&'static str> {
    ["inbox", "processing", "processed", "failed"]
        .into_iter()
        .filter(|dir| root.join(dir).join(name).exists())
        .collect()
}

#[tokio::test]
async fn remote_files_are_mirrored_to_their_terminal_location() {
    let mut s = setup().await;
    put(&s.remote_root, "inbox", VALID, &format!("{HEADER}\nFASTAG_ACQ,olm_id,APB-1,INSERT,P1,North Gate\n"));
    put(&s.remote_root, "inbox", "olm_id_FASTAG_ACQ_20240201.csv", &format!("{HEADER}\n"));
    put(&s.remote_root, "inbox", "upload.csv", "anything");
    put(&s.remote_root, "inbox", "readme.txt", "ignored");

    let handle = s.registry.get_mut("FASTAG_ACQ").unwrap();
    let summary = poll_remote(handle, &s.remote, &s.options, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.rejected, vec!["upload.csv".to_string()]);
    assert!(summary.errors.is_empty());
    assert_eq!(summary.reports.len(), 2);
    let statuses: Vec<FileStatus> = summary.reports.iter().map(|r| r.status).collect();
    assert!(statuses.contains(&FileStatus::Processed));
    assert!(statuses.contains(&FileStatus::Failed));

    assert_eq!(remote_location(&s.remote_root, VALID), vec!["processed"]);
    assert_eq!(remote_location(&s.remote_root, "olm_id_FASTAG_ACQ_20240201.csv"), vec!["failed"]);
    assert_eq!(remote_location(&s.remote_root, "upload.csv"), vec!["failed"]);
    assert_eq!(remote_location(&s.remote_root, "readme.txt"), vec!["inbox"]);

    let local = &s.registry.get_mut("FASTAG_ACQ").unwrap().paths;
    assert!(local.processed.join(VALID).exists());
    assert!(!local.inbox.join(VALID).exists());
}

#[tokio::test]
async fn download_failure_moves_remote_file_to_failed() {
    let mut s = setup().await;
    put(&s.remote_root, "inbox", VALID, &format!("{HEADER}\nFASTAG_ACQ,olm_id,APB-1,INSERT,P1,North Gate\n"));

    let handle = s.registry.get_mut("FASTAG_ACQ").unwrap();
    std::fs::remove_dir_all(&handle.paths.inbox).unwrap();
    let summary = poll_remote(handle, &s.remote, &s.options, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].1.contains("download"));
    assert_eq!(remote_location(&s.remote_root, VALID), vec!["failed"]);
}

#[tokio::test]
async fn cancelled_poll_loop_exits_without_claiming_files() {
    let mut s = setup().await;
    put(&s.remote_root, "inbox", VALID, &format!("{HEADER}\nFASTAG_ACQ,olm_id,APB-1,INSERT,P1,North Gate\n"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let remotes = vec![s.remote];
    tokio::time::timeout(
        Duration::from_secs(5),
        run_remote(&mut s.registry, &remotes, &s.options, None, Duration::from_secs(3600), cancel),
    )
    .await
    .unwrap();

    assert_eq!(remote_location(&s.remote_root, VALID), vec!["inbox"]);
}
