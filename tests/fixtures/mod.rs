#![allow(dead_code)]

use std::sync::Arc;

use quickpoll_client::bridge::{MockWalletBridge, WalletBridge};
use quickpoll_client::config::ClientConfig;
use quickpoll_client::indexer::{Poll, PollPage, StubIndexer};
use quickpoll_client::link_store::MemoryLinkStore;
use quickpoll_client::types::{Address, ChainId, PollId};
use quickpoll_client::PollClient;

pub const NEOX_T4: ChainId = ChainId(12_227_332);
pub const SEPOLIA: ChainId = ChainId(11_155_111);

pub fn address(byte: u8) -> Address {
    Address::parse(format!("0x{}", hex::encode([byte; 20]))).expect("address")
}

pub fn yes_no_page(poll_id: &str) -> PollPage {
    PollPage::new(
        vec![
            Poll::new(PollId::new(poll_id), "Ship it?", vec!["Yes".into(), "No".into()])
                .with_votes(vec![3, 5]),
        ],
        Vec::new(),
    )
}

pub struct Harness {
    pub bridge: MockWalletBridge,
    pub indexer: StubIndexer,
    pub links: Arc<MemoryLinkStore>,
    pub client: PollClient,
}

/// Client wired to a mock wallet holding `accounts` on `chain`.
pub fn harness(accounts: Vec<Address>, chain: ChainId, page: PollPage) -> Harness {
    harness_with(accounts, chain, page, MemoryLinkStore::default())
}

pub fn harness_with(
    accounts: Vec<Address>,
    chain: ChainId,
    page: PollPage,
    links: MemoryLinkStore,
) -> Harness {
    let bridge = MockWalletBridge::new(accounts, chain);
    let indexer = StubIndexer::new(page);
    let links = Arc::new(links);
    let client = PollClient::new(
        ClientConfig::default(),
        Some(Arc::new(bridge.clone()) as Arc<dyn WalletBridge>),
        Arc::new(indexer.clone()),
        links.clone(),
    );
    Harness {
        bridge,
        indexer,
        links,
        client,
    }
}
