use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Semaphore;

use super::session_manager::MAX_CAPTURE_SECONDS;
use super::*;
use crate::configuration::Config;
use crate::error_handling::types::{SessionError, SplitError};
use crate::storage::naming::{index_path, stream_file_name, INDEX_FILE_NAME};
use crate::storage::types::StreamIndex;
use crate::test_support::{
    init_logging, splitter, three_stream_capture, write_capture, FakeTools, StaticLookup,
};

fn controller(tools: &Arc<FakeTools>, dump_dir: &Path) -> CaptureController {
    let config = Config {
        dump_dir: dump_dir.to_path_buf(),
        ..Default::default()
    };
    CaptureController::new(
        Arc::new(config),
        splitter(tools, Arc::new(StaticLookup::default()), false),
    )
}

fn long_capture() -> CaptureRequest {
    CaptureRequest {
        duration_seconds: 3600,
        ..CaptureRequest::new("en0")
    }
}

async fn settle(controller: &CaptureController) {
    tokio::time::timeout(Duration::from_secs(10), controller.wait_until_idle())
        .await
        .expect("session returns to idle");
}

async fn wait_for_state(controller: &CaptureController, wanted: SessionState) {
    let mut rx = controller.subscribe_state();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if *rx.borrow_and_update() == wanted {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("state reached");
}

#[tokio::test]
async fn stopped_capture_is_split_and_indexed() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let tools = Arc::new(FakeTools {
        capture_fixture: Some(three_stream_capture()),
        ..Default::default()
    });
    let controller = controller(&tools, &dir.path().join("captures"));
    let mut progress = controller.subscribe_progress();

    let session = controller.start_capture(long_capture()).unwrap();
    assert_eq!(session.state, SessionState::Capturing);
    assert_eq!(session.iface_id.as_deref(), Some("en0"));
    let artifact = session.file_path.clone().unwrap();
    assert!(artifact.starts_with(dir.path().join("captures")));
    assert_eq!(controller.state(), SessionState::Capturing);

    controller.stop_capture().unwrap();
    settle(&controller).await;

    let outcome = controller.last_outcome().unwrap();
    let split_dir = match outcome {
        Outcome::Completed {
            split_dir, streams, ..
        } => {
            assert_eq!(streams, 3);
            split_dir
        }
        other => panic!("unexpected outcome {:?}", other),
    };
    let stem = artifact.file_stem().unwrap().to_string_lossy().to_string();
    assert!(split_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(&format!("{}-streams-", stem)));
    assert!(index_path(&split_dir).is_file());

    let mut seen = Vec::new();
    while let Ok(event) = progress.try_recv() {
        seen.push((event.current, event.stream_id));
    }
    assert_eq!(seen, vec![(1, 0), (2, 1), (3, 2)]);
    assert_eq!(controller.progress().len(), 3);

    let index = controller.read_index(&split_dir).unwrap();
    assert_eq!(index.stream_ids(), vec![0, 1, 2]);
    assert_eq!(controller.snapshot().session, CaptureSession::idle());

    let dumpcap = tools
        .calls()
        .into_iter()
        .find(|c| c.tool == crate::tooling::Tool::Dumpcap)
        .unwrap();
    assert_eq!(dumpcap.value_of("-i").as_deref(), Some("en0"));
    assert_eq!(dumpcap.value_of("-a").as_deref(), Some("duration:3600"));
}

#[tokio::test]
async fn second_capture_is_rejected_while_one_runs() {
    let dir = TempDir::new().unwrap();
    let tools = Arc::new(FakeTools {
        capture_fixture: Some(three_stream_capture()),
        ..Default::default()
    });
    let controller = controller(&tools, dir.path());

    controller.start_capture(long_capture()).unwrap();
    let err = controller.start_capture(long_capture()).unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive(SessionState::Capturing)));

    let err = controller
        .import(ImportRequest {
            path: dir.path().to_path_buf(),
            snap_len: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive(_)), "{}", err);

    controller.stop_capture().unwrap();
    settle(&controller).await;
}

#[tokio::test]
async fn stop_without_capture_is_rejected() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&Arc::new(FakeTools::default()), dir.path());
    let err = controller.stop_capture().unwrap_err();
    assert!(matches!(err, SessionError::NotCapturing(SessionState::Idle)));
}

#[tokio::test]
async fn capture_without_data_returns_to_idle() {
    let dir = TempDir::new().unwrap();
    let tools = Arc::new(FakeTools::default());
    let controller = controller(&tools, dir.path());

    controller.start_capture(long_capture()).unwrap();
    controller.stop_capture().unwrap();
    settle(&controller).await;

    match controller.last_outcome() {
        Some(Outcome::Failed { message }) => assert!(message.contains("no data"), "{}", message),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(*controller.subscribe_state().borrow(), SessionState::Idle);
    // Nothing was split
    assert_eq!(tools.calls().len(), 1);
    assert!(controller.start_capture(long_capture()).is_ok());
    controller.stop_capture().unwrap();
    settle(&controller).await;
}

#[tokio::test]
async fn invalid_capture_requests_are_rejected() {
    let dir = TempDir::new().unwrap();
    let tools = Arc::new(FakeTools::default());
    let controller = controller(&tools, dir.path());

    let requests = [
        CaptureRequest::new("  "),
        CaptureRequest {
            duration_seconds: 0,
            ..CaptureRequest::new("en0")
        },
        CaptureRequest {
            duration_seconds: MAX_CAPTURE_SECONDS + 1,
            ..CaptureRequest::new("en0")
        },
        CaptureRequest {
            snap_len: Some(10),
            ..CaptureRequest::new("en0")
        },
    ];
    for request in requests {
        let err = controller.start_capture(request).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)), "{}", err);
    }
    assert!(tools.calls().is_empty());
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn reading_a_directory_being_split_is_refused() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("trace.pcapng");
    write_capture(&artifact, &three_stream_capture());

    let gate = Arc::new(Semaphore::new(0));
    let tools = Arc::new(FakeTools {
        extract_gate: Some(gate.clone()),
        ..Default::default()
    });
    let controller = controller(&tools, dir.path());

    let importer = controller.clone();
    let path = artifact.clone();
    let import = tokio::spawn(async move {
        importer
            .import(ImportRequest {
                path,
                snap_len: None,
            })
            .await
    });

    wait_for_state(&controller, SessionState::Splitting).await;
    let split_dir = controller.snapshot().session.split_dir.unwrap();
    let err = controller.read_index(&split_dir).unwrap_err();
    assert!(matches!(err, SessionError::StillInProgress(ref d) if *d == split_dir));

    let err = controller.start_capture(long_capture()).unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive(SessionState::Splitting)));

    gate.add_permits(3);
    let index = import.await.unwrap().unwrap();
    assert_eq!(index.streams.len(), 3);
    assert_eq!(controller.read_index(&split_dir).unwrap(), index);
}

#[tokio::test]
async fn importing_or_rebuilding_a_directory_being_split_is_refused() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("trace.pcapng");
    write_capture(&artifact, &three_stream_capture());

    let gate = Arc::new(Semaphore::new(0));
    let tools = Arc::new(FakeTools {
        extract_gate: Some(gate.clone()),
        ..Default::default()
    });
    let controller = controller(&tools, dir.path());

    let importer = controller.clone();
    let path = artifact.clone();
    let import = tokio::spawn(async move {
        importer
            .import(ImportRequest {
                path,
                snap_len: None,
            })
            .await
    });

    wait_for_state(&controller, SessionState::Splitting).await;
    let split_dir = controller.snapshot().session.split_dir.unwrap();
    let in_progress = |result: Result<StreamIndex, SessionError>| {
        matches!(result, Err(SessionError::StillInProgress(ref d)) if *d == split_dir)
    };

    // No stream file yet
    assert!(in_progress(
        controller
            .import(ImportRequest {
                path: split_dir.clone(),
                snap_len: None,
            })
            .await
    ));

    // Stream 0 lands, stream 1 waits
    gate.add_permits(1);
    let first = split_dir.join(stream_file_name(0));
    tokio::time::timeout(Duration::from_secs(10), async {
        while !first.is_file() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first stream written");

    assert!(in_progress(
        controller
            .import(ImportRequest {
                path: split_dir.clone(),
                snap_len: None,
            })
            .await
    ));
    assert!(in_progress(controller.rebuild(&split_dir).await));
    // The parent resolves to its newest split folder
    assert!(in_progress(
        controller
            .import(ImportRequest {
                path: dir.path().to_path_buf(),
                snap_len: None,
            })
            .await
    ));
    assert!(!split_dir.join(INDEX_FILE_NAME).exists());

    gate.add_permits(2);
    let index = import.await.unwrap().unwrap();
    assert_eq!(index.streams.len(), 3);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn import_dispatches_on_what_the_path_holds() {
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("trace.pcapng");
    write_capture(&artifact, &three_stream_capture());
    let tools = Arc::new(FakeTools::default());
    let controller = controller(&tools, dir.path());

    // Raw artifact: split next to it
    let split = controller
        .import(ImportRequest {
            path: artifact.clone(),
            snap_len: Some(0),
        })
        .await
        .unwrap();
    assert_eq!(split.split_dir.parent(), Some(dir.path()));
    let split_dir = split.split_dir.clone();
    let extracts = tools.extract_calls();

    // Split folder with manifest: returned as is
    let existing = controller
        .import(ImportRequest {
            path: split_dir.clone(),
            snap_len: None,
        })
        .await
        .unwrap();
    assert_eq!(existing, split);
    assert_eq!(tools.extract_calls(), extracts);

    // Parent directory: newest split folder, rebuilt when its manifest is gone
    fs::remove_file(split_dir.join(INDEX_FILE_NAME)).unwrap();
    let rebuilt = controller
        .import(ImportRequest {
            path: dir.path().to_path_buf(),
            snap_len: None,
        })
        .await
        .unwrap();
    assert!(rebuilt.is_imported());
    assert_eq!(rebuilt.stream_ids(), split.stream_ids());
    assert_eq!(tools.extract_calls(), extracts);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn failed_import_does_not_leave_the_session_stuck() {
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("broken.pcap");
    write_capture(&artifact, &three_stream_capture());
    let tools = Arc::new(FakeTools {
        fail_enumerate: true,
        ..Default::default()
    });
    let controller = controller(&tools, dir.path());

    let err = controller
        .import(ImportRequest {
            path: artifact,
            snap_len: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SplitError(SplitError::Enumerate(_))));
    assert_eq!(controller.state(), SessionState::Idle);
    match controller.last_outcome() {
        Some(Outcome::Failed { message }) => assert!(message.contains("enumerate")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn rebuild_requires_a_split_folder() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&Arc::new(FakeTools::default()), dir.path());
    let err = controller.rebuild(dir.path()).await.unwrap_err();
    assert!(matches!(err, SessionError::NotASplitFolder(_)));

    let err = controller
        .import(ImportRequest {
            path: dir.path().to_path_buf(),
            snap_len: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NothingToImport(_)));

    let err = controller.read_index(&PathBuf::from("/nonexistent/split")).unwrap_err();
    assert!(matches!(err, SessionError::StorageError(_)));
}
