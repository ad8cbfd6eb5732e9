#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use zk_review::challenge::{Challenge, ChallengeIssuer, CodeSender};
use zk_review::group::GroupInfo;
use zk_review::pool::VerificationPool;
use zk_review::prover::Prover;
use zk_review::storage::{Storage, Target};
use zk_review::{ReviewService, Verifier};

pub const DEPTH: usize = 3;

/// Keys shared by every test in a binary. Setup is the slow part.
pub fn keys() -> &'static (Prover, Vec<u8>) {
    static KEYS: OnceLock<(Prover, Vec<u8>)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let (prover, vk) = Prover::setup(DEPTH).unwrap();
        let vk_bytes = Verifier::new(vk, DEPTH).unwrap().to_bytes().unwrap();
        (prover, vk_bytes)
    })
}

pub fn prover() -> &'static Prover {
    &keys().0
}

/// Records every code it is asked to deliver.
#[derive(Default)]
pub struct Outbox(Mutex<Vec<(String, String)>>);

impl Outbox {
    pub fn last_code_for(&self, email: &str) -> String {
        self.0
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
            .unwrap()
    }
}

impl CodeSender for Outbox {
    fn send(&self, email: &str, challenge: &Challenge) {
        self.0
            .lock()
            .unwrap()
            .push((email.to_string(), challenge.code.clone()));
    }
}

pub fn service() -> (Arc<ReviewService>, Arc<Outbox>) {
    let storage = Arc::new(Storage::temporary().unwrap());
    storage
        .seed(
            &[
                GroupInfo {
                    id: "acme".into(),
                    name: "Acme Corp".into(),
                    domain: "acme.com".into(),
                },
                GroupInfo {
                    id: "globex".into(),
                    name: "Globex".into(),
                    domain: "globex.com".into(),
                },
            ],
            &[
                Target {
                    id: "target-42".into(),
                    name: "Target 42".into(),
                },
                Target {
                    id: "target-43".into(),
                    name: "Target 43".into(),
                },
            ],
        )
        .unwrap();

    let outbox = Arc::new(Outbox::default());
    let service = ReviewService::new(
        storage,
        ChallengeIssuer::new(vec![0x42; 32], Duration::from_secs(600)).unwrap(),
        Verifier::from_bytes(&keys().1).unwrap(),
        VerificationPool::new(2, Duration::from_secs(60)),
    )
    .with_sender(outbox.clone())
    .with_proving_key(prover().proving_key_bytes().unwrap());

    (Arc::new(service), outbox)
}
