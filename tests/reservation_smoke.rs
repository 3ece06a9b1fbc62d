use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use machinehub::{
    cache::MemoryCache,
    device::HttpDeviceGateway,
    domain::MachineStatus,
    state::{JsonSnapshotStore, StoreInit},
    store::LocalMachineStore,
    workflow::{ReservationWorkflow, ResultCode},
};

fn seeded_store(data_dir: &std::path::Path) -> JsonSnapshotStore {
    let store = JsonSnapshotStore::load_or_init(StoreInit {
        data_dir: data_dir.to_path_buf(),
    })
    .unwrap();
    store
        .provision_machine("m1".to_string(), "L1".to_string())
        .unwrap();
    store
        .provision_machine("m2".to_string(), "L1".to_string())
        .unwrap();
    store
}

/// Device API that flags the machine ERROR in the shared data dir before
/// answering with a fault, the way the device fleet does.
struct FaultingFleet {
    fleet: JsonSnapshotStore,
}

impl Respond for FaultingFleet {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let machine_id = request
            .url
            .path()
            .trim_start_matches("/devices/")
            .trim_end_matches("/start-cycle")
            .to_string();
        self.fleet
            .update_machine_status(&machine_id, MachineStatus::Error)
            .unwrap();
        ResponseTemplate::new(500).set_body_json(serde_json::json!({ "error": "hardware_fault" }))
    }
}

fn workflow_for(server: &MockServer, store: JsonSnapshotStore) -> ReservationWorkflow {
    let device = HttpDeviceGateway::try_new(
        server.uri(),
        Some("devtoken".to_string()),
        Duration::from_secs(2),
    )
    .unwrap();
    ReservationWorkflow::new(
        Arc::new(LocalMachineStore::new(store)),
        Arc::new(MemoryCache::new()),
        Arc::new(device),
    )
}

#[tokio::test]
async fn reserve_then_start_persists_running_machine() {
    let tmp = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/devices/m1/start-cycle"))
        .and(header("authorization", "Bearer devtoken"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let workflow = workflow_for(&server, seeded_store(tmp.path()));

    let reserved = workflow.request_machine("L1", "job-1").await;
    assert_eq!(reserved.code, ResultCode::Ok);
    let machine = reserved.machine.unwrap();
    assert_eq!(machine.machine_id, "m1");
    assert_eq!(machine.status, MachineStatus::AwaitingDropoff);
    assert_eq!(machine.job_id.as_deref(), Some("job-1"));

    let second = workflow.request_machine("L1", "job-2").await;
    assert_eq!(second.machine.unwrap().machine_id, "m2");

    let exhausted = workflow.request_machine("L1", "job-3").await;
    assert_eq!(exhausted.code, ResultCode::NotFound);
    assert!(exhausted.machine.is_none());

    let started = workflow.start_machine("m1").await;
    assert_eq!(started.code, ResultCode::Ok);
    assert_eq!(started.machine.unwrap().status, MachineStatus::Running);

    let cached = workflow.get_machine("m1").await;
    assert_eq!(cached.machine.unwrap().status, MachineStatus::Running);

    let restart = workflow.start_machine("m1").await;
    assert_eq!(restart.code, ResultCode::BadRequest);

    let reloaded = JsonSnapshotStore::load_or_init(StoreInit {
        data_dir: tmp.path().to_path_buf(),
    })
    .unwrap();
    let m1 = reloaded.get_machine("m1").unwrap().unwrap();
    assert_eq!(m1.status, MachineStatus::Running);
    assert_eq!(m1.job_id.as_deref(), Some("job-1"));
}

#[tokio::test]
async fn unconfirmed_device_fault_is_internal_and_leaves_reservation() {
    let tmp = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/devices/m1/start-cycle"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({ "error": "hardware_fault" })),
        )
        .mount(&server)
        .await;

    let workflow = workflow_for(&server, seeded_store(tmp.path()));
    assert_eq!(
        workflow.request_machine("L1", "job-1").await.code,
        ResultCode::Ok
    );

    let started = workflow.start_machine("m1").await;
    assert_eq!(started.code, ResultCode::InternalServerError);
    assert!(started.machine.is_none());

    let current = workflow.get_machine("m1").await;
    assert_eq!(current.machine.unwrap().status, MachineStatus::AwaitingDropoff);
}

#[tokio::test]
async fn fault_confirmed_by_the_fleet_is_a_hardware_error() {
    let tmp = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/devices/m1/start-cycle"))
        .respond_with(FaultingFleet {
            fleet: JsonSnapshotStore::load_or_init(StoreInit {
                data_dir: tmp.path().to_path_buf(),
            })
            .unwrap(),
        })
        .expect(1)
        .mount(&server)
        .await;

    let workflow = workflow_for(&server, seeded_store(tmp.path()));
    assert_eq!(
        workflow.request_machine("L1", "job-1").await.code,
        ResultCode::Ok
    );

    let started = workflow.start_machine("m1").await;
    assert_eq!(started.code, ResultCode::HardwareError);
    let machine = started.machine.unwrap();
    assert_eq!(machine.status, MachineStatus::Error);
    assert_eq!(machine.job_id.as_deref(), Some("job-1"));

    let cached = workflow.get_machine("m1").await;
    assert_eq!(cached.machine.unwrap().status, MachineStatus::Error);
}

#[tokio::test]
async fn machines_provisioned_while_serving_are_reservable() {
    let tmp = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let workflow = workflow_for(&server, seeded_store(tmp.path()));

    for job in ["job-1", "job-2"] {
        assert_eq!(workflow.request_machine("L1", job).await.code, ResultCode::Ok);
    }
    assert_eq!(
        workflow.request_machine("L1", "job-3").await.code,
        ResultCode::NotFound
    );

    let provisioning = JsonSnapshotStore::load_or_init(StoreInit {
        data_dir: tmp.path().to_path_buf(),
    })
    .unwrap();
    provisioning
        .provision_machine("m3".to_string(), "L1".to_string())
        .unwrap();

    let reserved = workflow.request_machine("L1", "job-3").await;
    assert_eq!(reserved.code, ResultCode::Ok);
    assert_eq!(reserved.machine.unwrap().machine_id, "m3");
    assert_eq!(provisioning.load().unwrap().machines.len(), 3);
}
