/// Readiness of the current runtime instance.
///
/// The two gates are derived from this single state: the view-ready gate is
/// open from `ViewReady` onwards, the session-restored gate only in `Restored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    NotLoaded,
    ViewReady,
    Restoring,
    Restored,
}

/// Gate an outbound envelope waits behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    ViewReady,
    SessionRestored,
}

impl Readiness {
    pub fn admits(self, wait_for: WaitFor) -> bool {
        match wait_for {
            WaitFor::ViewReady => self.is_view_ready(),
            WaitFor::SessionRestored => self.is_restored(),
        }
    }

    pub fn is_view_ready(self) -> bool {
        !matches!(self, Readiness::NotLoaded)
    }

    pub fn is_restored(self) -> bool {
        matches!(self, Readiness::Restored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Readiness::NotLoaded => "not_loaded",
            Readiness::ViewReady => "view_ready",
            Readiness::Restoring => "restoring",
            Readiness::Restored => "restored",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gates_open_in_order() {
        assert!(!Readiness::NotLoaded.admits(WaitFor::ViewReady));
        assert!(!Readiness::NotLoaded.admits(WaitFor::SessionRestored));
        for state in [Readiness::ViewReady, Readiness::Restoring] {
            assert!(state.admits(WaitFor::ViewReady));
            assert!(!state.admits(WaitFor::SessionRestored));
        }
        assert!(Readiness::Restored.admits(WaitFor::ViewReady));
        assert!(Readiness::Restored.admits(WaitFor::SessionRestored));
    }
}
