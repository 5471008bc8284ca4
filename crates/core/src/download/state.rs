use serde::{Deserialize, Serialize};

/// Where a session's download loop currently is.
///
/// Transitions only move forward through the declared order, except the
/// loop edge from `AdvanceFeed` back to `WaitItemReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Idle,
    OpenFirstItem,
    WaitItemReady,
    StartExport,
    WaitExportStart,
    WaitFileSaved,
    AdvanceFeed,
    Done,
}

impl DownloadState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: DownloadState) -> bool {
        if self == DownloadState::AdvanceFeed && next == DownloadState::WaitItemReady {
            return true;
        }
        next > self
    }

    pub fn is_terminal(self) -> bool {
        self == DownloadState::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadState::Idle => "idle",
            DownloadState::OpenFirstItem => "open_first_item",
            DownloadState::WaitItemReady => "wait_item_ready",
            DownloadState::StartExport => "start_export",
            DownloadState::WaitExportStart => "wait_export_start",
            DownloadState::WaitFileSaved => "wait_file_saved",
            DownloadState::AdvanceFeed => "advance_feed",
            DownloadState::Done => "done",
        }
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use DownloadState::*;
        assert!(Idle.can_transition_to(OpenFirstItem));
        assert!(WaitItemReady.can_transition_to(StartExport));
        assert!(WaitFileSaved.can_transition_to(Done));
        // Iteration failure jumps straight to the advance.
        assert!(WaitItemReady.can_transition_to(AdvanceFeed));
    }

    #[test]
    fn test_only_loop_edge_goes_back() {
        use DownloadState::*;
        assert!(AdvanceFeed.can_transition_to(WaitItemReady));
        assert!(!AdvanceFeed.can_transition_to(StartExport));
        assert!(!WaitFileSaved.can_transition_to(WaitItemReady));
        assert!(!Done.can_transition_to(WaitItemReady));
        assert!(!StartExport.can_transition_to(StartExport));
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&DownloadState::WaitFileSaved).unwrap();
        assert_eq!(json, "\"wait_file_saved\"");
        assert_eq!(DownloadState::WaitFileSaved.to_string(), "wait_file_saved");
    }
}
