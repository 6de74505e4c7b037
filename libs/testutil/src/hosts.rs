//! Recording implementations of the host-side capability traits.
use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chatlink_core::{
    BannerContent, BannerOutcome, ChatDelegate, ChatError, EmbedContainer, InAppBanner,
    LinkAction, ModalHost, SharedRuntime, UnreadMessageInfo,
};
use url::Url;

use crate::lock;

#[derive(Debug, Clone, PartialEq)]
pub enum DelegateEvent {
    Started,
    Presented,
    Dismissed,
    Failed(ChatError),
    UnreadChanged(u64),
    LinkClicked(String),
}

/// Delegate that records every notification in arrival order.
#[derive(Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<DelegateEvent>>,
    link_action: Mutex<LinkAction>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link_action(self, action: LinkAction) -> Self {
        *lock(&self.link_action) = action;
        self
    }

    pub fn events(&self) -> Vec<DelegateEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, event: &DelegateEvent) -> usize {
        lock(&self.events).iter().filter(|seen| *seen == event).count()
    }

    pub fn failures(&self) -> Vec<ChatError> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                DelegateEvent::Failed(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: DelegateEvent) {
        lock(&self.events).push(event);
    }
}

impl ChatDelegate for RecordingDelegate {
    fn chat_did_start(&self) {
        self.record(DelegateEvent::Started);
    }

    fn chat_did_present(&self) {
        self.record(DelegateEvent::Presented);
    }

    fn chat_did_dismiss(&self) {
        self.record(DelegateEvent::Dismissed);
    }

    fn chat_did_fail(&self, error: &ChatError) {
        self.record(DelegateEvent::Failed(error.clone()));
    }

    fn unread_message_did_change(&self, info: &UnreadMessageInfo) {
        self.record(DelegateEvent::UnreadChanged(info.count));
    }

    fn link_did_click(&self, url: &Url) -> LinkAction {
        self.record(DelegateEvent::LinkClicked(url.to_string()));
        *lock(&self.link_action)
    }
}

/// Modal host whose window attachment can be toggled by the test.
pub struct RecordingModalHost {
    attached: AtomicBool,
    presents: AtomicUsize,
    dismissals: AtomicUsize,
    attach_checks: AtomicUsize,
}

impl RecordingModalHost {
    pub fn attached() -> Self {
        Self::with_attachment(true)
    }

    pub fn detached() -> Self {
        Self::with_attachment(false)
    }

    fn with_attachment(attached: bool) -> Self {
        Self {
            attached: AtomicBool::new(attached),
            presents: AtomicUsize::new(0),
            dismissals: AtomicUsize::new(0),
            attach_checks: AtomicUsize::new(0),
        }
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn presents(&self) -> usize {
        self.presents.load(Ordering::SeqCst)
    }

    pub fn dismissals(&self) -> usize {
        self.dismissals.load(Ordering::SeqCst)
    }

    pub fn attach_checks(&self) -> usize {
        self.attach_checks.load(Ordering::SeqCst)
    }
}

impl ModalHost for RecordingModalHost {
    fn is_attached_to_window(&self) -> bool {
        self.attach_checks.fetch_add(1, Ordering::SeqCst);
        self.attached.load(Ordering::SeqCst)
    }

    fn present(&self, _runtime: &SharedRuntime) {
        self.presents.fetch_add(1, Ordering::SeqCst);
    }

    fn dismiss(&self, _runtime: &SharedRuntime) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingContainer {
    attaches: AtomicUsize,
    detaches: AtomicUsize,
}

impl RecordingContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    /// True while the runtime view is attached.
    pub fn is_holding(&self) -> bool {
        self.attaches() > self.detaches()
    }
}

impl EmbedContainer for RecordingContainer {
    fn attach(&self, _runtime: &SharedRuntime) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self, _runtime: &SharedRuntime) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

/// Banner that reports a fixed outcome and remembers what it showed.
pub struct ScriptedBanner {
    outcome: BannerOutcome,
    shown: Mutex<Vec<BannerContent>>,
}

impl ScriptedBanner {
    pub fn new(outcome: BannerOutcome) -> Self {
        Self {
            outcome,
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<BannerContent> {
        lock(&self.shown).clone()
    }
}

#[async_trait]
impl InAppBanner for ScriptedBanner {
    async fn show(&self, content: BannerContent) -> BannerOutcome {
        lock(&self.shown).push(content);
        self.outcome
    }
}
