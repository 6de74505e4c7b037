#![allow(dead_code)]

use std::sync::Arc;

use chatlink_core::{ChatConfig, StaticIdentity};
use chatlink_session::{ChatSession, SessionDeps, SessionSettings};
use chatlink_testutil::{
    FakeRuntime, FakeRuntimeFactory, RecordingDelegate, RecordingModalHost, eventually,
};

pub const APP_ID: &str = "A";
pub const TEAM_ID: &str = "team-7";

pub struct Harness {
    pub session: ChatSession,
    pub factory: Arc<FakeRuntimeFactory>,
    pub delegate: Arc<RecordingDelegate>,
    pub host: Arc<RecordingModalHost>,
}

pub fn harness(factory: FakeRuntimeFactory) -> Harness {
    harness_with(factory, SessionSettings::default())
}

pub fn harness_with(factory: FakeRuntimeFactory, settings: SessionSettings) -> Harness {
    harness_with_delegate(factory, settings, RecordingDelegate::new())
}

pub fn harness_with_delegate(
    factory: FakeRuntimeFactory,
    settings: SessionSettings,
    delegate: RecordingDelegate,
) -> Harness {
    let factory = Arc::new(factory);
    let delegate = Arc::new(delegate);
    let host = Arc::new(RecordingModalHost::attached());
    let session = ChatSession::spawn(
        SessionDeps::new(factory.clone())
            .with_delegate(delegate.clone())
            .with_identity(Arc::new(StaticIdentity(TEAM_ID.into())))
            .with_modal_host(host.clone())
            .with_settings(settings),
    );
    Harness {
        session,
        factory,
        delegate,
        host,
    }
}

impl Harness {
    pub fn configure(&self) {
        self.session
            .configure(ChatConfig::new(APP_ID).with_language("en"));
    }

    pub fn start(&self) {
        self.configure();
        self.session.start_session(None);
    }

    /// Starts a session and waits for the restore handshake to complete.
    pub async fn start_restored(&self) -> Arc<FakeRuntime> {
        self.start();
        self.wait_restored().await;
        self.runtime()
    }

    pub async fn wait_restored(&self) {
        eventually(|| self.session.snapshot().restored).await;
    }

    pub async fn wait_runtime(&self, count: usize) -> Arc<FakeRuntime> {
        eventually(|| self.factory.created() >= count).await;
        self.runtime()
    }

    pub fn runtime(&self) -> Arc<FakeRuntime> {
        self.factory.latest().expect("a runtime was created")
    }
}
