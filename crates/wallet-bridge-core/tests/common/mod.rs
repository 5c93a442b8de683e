#![allow(dead_code)]

use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use wallet_bridge_core::{
    ApprovalObserver, ChannelHandle, DappOrigin, MemoryWallet, PushMessage, Transport,
    WalletPublishers, WalletService,
};

/// Records every push, in order.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChannelHandle, PushMessage)>>,
    changed: Notify,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(ChannelHandle, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: ChannelHandle) -> Vec<PushMessage> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == channel)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn kinds_to(&self, channel: ChannelHandle) -> Vec<&'static str> {
        self.sent_to(channel).iter().map(PushMessage::kind).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Wait until the recorded pushes satisfy `pred`.
    pub async fn wait_until(&self, pred: impl Fn(&[(ChannelHandle, PushMessage)]) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mut changed = pin!(self.changed.notified());
                changed.as_mut().enable();
                if pred(&self.sent.lock().unwrap()) {
                    return;
                }
                changed.await;
            }
        })
        .await
        .expect("expected pushes never arrived");
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &PushMessage, channels: &[ChannelHandle]) {
        let mut sent = self.sent.lock().unwrap();
        for channel in channels {
            sent.push((*channel, message.clone()));
        }
        drop(sent);
        self.changed.notify_waiters();
    }
}

/// Records approval transitions for one dapp connection.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ApprovalObserver for RecordingObserver {
    fn needs_approval(&self, origin: &DappOrigin, suggested_petname: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("needs {origin} as {suggested_petname}"));
    }

    fn approved(&self, origin: &DappOrigin) {
        self.events.lock().unwrap().push(format!("approved {origin}"));
    }
}

pub struct Harness {
    pub wallet: Arc<MemoryWallet>,
    pub transport: Arc<RecordingTransport>,
    pub service: WalletService,
}

pub fn harness() -> Harness {
    let publishers = WalletPublishers::new();
    let wallet = Arc::new(MemoryWallet::new(&publishers));
    let transport = Arc::new(RecordingTransport::default());
    let service = WalletService::new(wallet.clone(), &publishers, transport.clone());
    Harness {
        wallet,
        transport,
        service,
    }
}

pub fn origin(s: &str) -> DappOrigin {
    s.parse().unwrap()
}
