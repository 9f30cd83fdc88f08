use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use terrarium::model::{CodeVersion, JobKind, JobStatus, FILE_FORMAT_VERSION};
use terrarium::net::message::{JobSubmission, Message, ResourceFormat};
use terrarium::net::registry::{ChannelHandle, ConnectionRegistry};
use terrarium::net::router::{MessageRouter, ServerContext};
use terrarium::persistence::{MemoryPersistence, PersistenceGateway};

struct Fixture {
    store: Arc<MemoryPersistence>,
    registry: ConnectionRegistry,
    router: MessageRouter,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryPersistence::new());
    let registry = ConnectionRegistry::new();
    let ctx = Arc::new(ServerContext::new(registry.clone(), store.clone()));
    Fixture {
        store,
        registry,
        router: MessageRouter::new(ctx),
    }
}

fn channel() -> (ChannelHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelHandle::new(tx), rx)
}

fn pledge(worker_id: Uuid, throughputs: Vec<u32>) -> Message {
    Message::WorkerPledge {
        worker_id,
        throughputs,
        active: true,
        file_format_version: FILE_FORMAT_VERSION,
        code_version: CodeVersion::new(0, 1, 0),
    }
}

#[tokio::test]
async fn pledge_upserts_worker_and_registers_channel() {
    let f = fixture();
    let (handle, _rx) = channel();
    let worker_id = Uuid::new_v4();

    f.router
        .dispatch(&handle, pledge(worker_id, vec![100, 150]))
        .await
        .unwrap();

    let workers = f.store.fetch_active_workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].id, worker_id);
    assert_eq!(workers[0].throughputs, vec![100, 150]);

    let registered = f.registry.lookup(worker_id).unwrap();
    assert_eq!(registered.connection_id(), handle.connection_id());
}

#[tokio::test]
async fn repledge_updates_record_and_rebinds_channel() {
    let f = fixture();
    let worker_id = Uuid::new_v4();

    let (first, _rx1) = channel();
    f.router
        .dispatch(&first, pledge(worker_id, vec![100]))
        .await
        .unwrap();

    let (second, _rx2) = channel();
    f.router
        .dispatch(&second, pledge(worker_id, vec![100, 200]))
        .await
        .unwrap();

    let workers = f.store.fetch_all_workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].throughputs, vec![100, 200]);

    let registered = f.registry.lookup(worker_id).unwrap();
    assert_eq!(registered.connection_id(), second.connection_id());
}

#[tokio::test]
async fn packed_resource_is_stored_in_canonical_form() {
    let f = fixture();
    let (handle, _rx) = channel();
    let resource_id = Uuid::new_v4();
    let json = r#"{"width":40,"height":25}"#;

    f.router
        .dispatch(
            &handle,
            Message::SendResource {
                resource_id,
                data: ResourceFormat::Packed.encode_from_canonical(json),
                format: ResourceFormat::Packed,
            },
        )
        .await
        .unwrap();

    let stored = f.store.fetch_resource(resource_id).await.unwrap().unwrap();
    assert_eq!(stored.json_data, json);
    assert_eq!(stored.file_format_version, FILE_FORMAT_VERSION);
}

#[tokio::test]
async fn corrupt_packed_resource_fails_without_storing() {
    let f = fixture();
    let (handle, _rx) = channel();
    let resource_id = Uuid::new_v4();

    let result = f
        .router
        .dispatch(
            &handle,
            Message::SendResource {
                resource_id,
                data: "!!! not base64 !!!".to_string(),
                format: ResourceFormat::Packed,
            },
        )
        .await;

    assert!(result.is_err());
    assert!(f.store.fetch_resource(resource_id).await.unwrap().is_none());
}

#[tokio::test]
async fn resource_request_replies_in_requested_format() {
    let f = fixture();
    let (handle, mut rx) = channel();
    let resource_id = Uuid::new_v4();
    let json = r#"{"seed":7}"#;

    f.router
        .dispatch(
            &handle,
            Message::SendResource {
                resource_id,
                data: json.to_string(),
                format: ResourceFormat::Json,
            },
        )
        .await
        .unwrap();

    f.router
        .dispatch(
            &handle,
            Message::RequestResource {
                resource_id,
                format: ResourceFormat::Packed,
            },
        )
        .await
        .unwrap();

    match rx.try_recv().unwrap() {
        Message::SendResource {
            resource_id: id,
            data,
            format,
        } => {
            assert_eq!(id, resource_id);
            assert_eq!(format, ResourceFormat::Packed);
            assert_eq!(
                ResourceFormat::Packed.decode_to_canonical(&data).unwrap(),
                json
            );
        }
        other => panic!("expected SendResource reply, got {:?}", other),
    }
}

#[tokio::test]
async fn absent_resource_request_is_a_silent_noop() {
    let f = fixture();
    let (handle, mut rx) = channel();

    f.router
        .dispatch(
            &handle,
            Message::RequestResource {
                resource_id: Uuid::new_v4(),
                format: ResourceFormat::Json,
            },
        )
        .await
        .unwrap();

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn create_job_persists_blocked_with_no_checkout() {
    let f = fixture();
    let (handle, _rx) = channel();
    let job_id = Uuid::new_v4();
    let dep = Uuid::new_v4();

    f.router
        .dispatch(
            &handle,
            Message::CreateJob {
                job: JobSubmission {
                    job_id,
                    kind: JobKind::RunSimulation { end_tick: 5000 },
                    priority: 7,
                    dependencies: vec![dep],
                    input_resources: vec![Uuid::new_v4()],
                    output_resources: vec![Uuid::new_v4()],
                },
            },
        )
        .await
        .unwrap();

    let blocked = f.store.fetch_jobs_with_status(JobStatus::Blocked).await.unwrap();
    assert_eq!(blocked.len(), 1);
    let job = &blocked[0];
    assert_eq!(job.id, job_id);
    assert_eq!(job.kind, JobKind::RunSimulation { end_tick: 5000 });
    assert_eq!(job.priority, 7);
    assert_eq!(job.dependencies, vec![dep]);
    assert!(job.checked_out_by.is_none());
}

#[tokio::test]
async fn completion_report_moves_checked_out_job_to_terminal_state() {
    let f = fixture();
    let (handle, _rx) = channel();
    let worker_id = Uuid::new_v4();
    let job_id = Uuid::new_v4();

    f.router
        .dispatch(
            &handle,
            Message::CreateJob {
                job: JobSubmission {
                    job_id,
                    kind: JobKind::CreateWorld,
                    priority: 1,
                    dependencies: vec![],
                    input_resources: vec![],
                    output_resources: vec![],
                },
            },
        )
        .await
        .unwrap();
    f.store
        .update_job_status(job_id, JobStatus::Processing, Some(worker_id))
        .await
        .unwrap();

    f.router
        .dispatch(
            &handle,
            Message::ReportJobCompletion {
                worker_id,
                job_id,
                succeeded: true,
            },
        )
        .await
        .unwrap();

    let done = f.store.fetch_jobs_with_status(JobStatus::Done).await.unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, job_id);
    assert!(done[0].checked_out_by.is_none());
}

#[tokio::test]
async fn completion_report_from_wrong_worker_is_ignored() {
    let f = fixture();
    let (handle, _rx) = channel();
    let owner = Uuid::new_v4();
    let imposter = Uuid::new_v4();
    let job_id = Uuid::new_v4();

    f.router
        .dispatch(
            &handle,
            Message::CreateJob {
                job: JobSubmission {
                    job_id,
                    kind: JobKind::CreateWorld,
                    priority: 1,
                    dependencies: vec![],
                    input_resources: vec![],
                    output_resources: vec![],
                },
            },
        )
        .await
        .unwrap();
    f.store
        .update_job_status(job_id, JobStatus::Processing, Some(owner))
        .await
        .unwrap();

    f.router
        .dispatch(
            &handle,
            Message::ReportJobCompletion {
                worker_id: imposter,
                job_id,
                succeeded: false,
            },
        )
        .await
        .unwrap();

    let processing = f
        .store
        .fetch_jobs_with_status(JobStatus::Processing)
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].checked_out_by, Some(owner));
}

#[tokio::test]
async fn completion_report_for_unassigned_job_is_ignored() {
    let f = fixture();
    let (handle, _rx) = channel();
    let job_id = Uuid::new_v4();

    f.router
        .dispatch(
            &handle,
            Message::CreateJob {
                job: JobSubmission {
                    job_id,
                    kind: JobKind::CreateWorld,
                    priority: 1,
                    dependencies: vec![],
                    input_resources: vec![],
                    output_resources: vec![],
                },
            },
        )
        .await
        .unwrap();

    f.router
        .dispatch(
            &handle,
            Message::ReportJobCompletion {
                worker_id: Uuid::new_v4(),
                job_id,
                succeeded: true,
            },
        )
        .await
        .unwrap();

    assert!(f
        .store
        .fetch_jobs_with_status(JobStatus::Blocked)
        .await
        .unwrap()
        .iter()
        .any(|j| j.id == job_id));
}
