#![allow(dead_code)]

use drd::{
    Config, DefaultConfig, Detector, DetectorError, RacePolicy, Settings, Worker,
    types::{AccessKind, AccessMode, Address, NodeId},
};

pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init()
            .ok();
    });
}

pub fn id(x: u64) -> NodeId {
    NodeId(x)
}

pub fn detector(policy: RacePolicy) -> Detector<DefaultConfig> {
    init_tracing();
    Detector::with_settings(Default::default(), Settings::default().with_policy(policy))
}

/// Terse drivers for the entry points, panicking on protocol violations.
pub trait Drive {
    fn root(&self, worker: &mut Worker, task: u64);
    fn spawn(&self, worker: &mut Worker, task: u64, parent: u64, deps: &[u64]);
    fn start(&self, worker: &mut Worker, task: u64, acquired: &[u64]);
    fn buffer(&self, worker: &mut Worker, buffer: u64, base: Address, len: u64);
    fn write(&self, worker: &mut Worker, address: Address, size: u32) -> bool;
    fn read(&self, worker: &mut Worker, address: Address, size: u32) -> bool;
}

impl<C: Config> Drive for Detector<C> {
    fn root(&self, worker: &mut Worker, task: u64) {
        self.task_created(worker, id(task), None, &[], None).unwrap();
    }

    fn spawn(&self, worker: &mut Worker, task: u64, parent: u64, deps: &[u64]) {
        let deps: Vec<_> = deps.iter().copied().map(id).collect();
        self.task_created(worker, id(task), Some(id(parent)), &deps, None)
            .unwrap();
    }

    fn start(&self, worker: &mut Worker, task: u64, acquired: &[u64]) {
        let acquired: Vec<_> = acquired.iter().copied().map(id).collect();
        self.task_started(worker, id(task), &acquired).unwrap();
    }

    fn buffer(&self, worker: &mut Worker, buffer: u64, base: Address, len: u64) {
        self.buffer_created(worker, id(buffer), base, len, AccessMode::ReadWrite)
            .unwrap();
    }

    /// Returns whether the access was accepted without a race error.
    fn write(&self, worker: &mut Worker, address: Address, size: u32) -> bool {
        let ip = 0x40_0000 + address;
        race_free(self.memory_accessed(worker, address, size, ip, AccessKind::Write))
    }

    fn read(&self, worker: &mut Worker, address: Address, size: u32) -> bool {
        let ip = 0x50_0000 + address;
        race_free(self.memory_accessed(worker, address, size, ip, AccessKind::Read))
    }
}

/// `false` on a race error; any other error fails the test.
fn race_free(result: Result<(), DetectorError>) -> bool {
    match result {
        Ok(()) => true,
        Err(DetectorError::Race(_)) => false,
        Err(err) => panic!("unexpected protocol violation: {err}"),
    }
}
