//! # Board Engine
//!
//! The departure lifecycle engine: a bounded visible window of at most six
//! rows drawn from the schedule, advanced through a per-row state machine
//! on every clock tick. The engine decides when rows enter and leave the
//! window, which badges apply, when the shared pass-through notice is
//! active, and when one-shot cues fire. It knows nothing about rendering;
//! the front end projects `rows()` / `notice()` after each tick.

use crate::config::Thresholds;
use crate::schedule::{DepartureRecord, Schedule};
use chrono::{DateTime, Duration, Local};

/// Maximum number of rows the visible window holds.
pub const WINDOW_ROWS: usize = 6;

/// Seconds a terminating service dwells as "stopped" after its time passes
/// before entering the post-departure phase.
const TERMINAL_DWELL_SECS: i64 = 60;

/// Identifies a visible row across ticks. Ids are never reused, so a
/// removed row can be told apart from a later arrival in the same slot.
pub type RowId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainKind {
    Regular,
    /// Terminates at this station (回送); dwells after its time passes.
    TerminalHere,
    /// Does not stop here; triggers the platform notice.
    PassThrough,
}

impl TrainKind {
    fn of(record: &DepartureRecord) -> Self {
        if record.is_terminal_here() {
            TrainKind::TerminalHere
        } else if record.pass_through {
            TrainKind::PassThrough
        } else {
            TrainKind::Regular
        }
    }
}

/// Per-row display status. Terminal services share the regular thresholds
/// but use their own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    OnTime,
    Delayed,
    Approaching,
    Arrived,
    Stopped,
    TerminalApproaching,
    TerminalArrived,
    TerminalStopped,
    Departed,
    Passed,
}

/// Coarse status grouping for external style mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Scheduled,
    Delayed,
    Approaching,
    Arrived,
    Stopped,
    Departed,
    Passing,
}

impl RowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RowStatus::OnTime => "定刻",
            RowStatus::Delayed => "遅延",
            RowStatus::Approaching => "接近",
            RowStatus::Arrived => "到着",
            RowStatus::Stopped => "停車中",
            RowStatus::TerminalApproaching => "終着 接近",
            RowStatus::TerminalArrived => "終着 到着",
            RowStatus::TerminalStopped => "終着 停車中",
            RowStatus::Departed => "発車",
            RowStatus::Passed => "通過",
        }
    }

    pub fn category(&self) -> StatusCategory {
        match self {
            RowStatus::OnTime => StatusCategory::Scheduled,
            RowStatus::Delayed => StatusCategory::Delayed,
            RowStatus::Approaching | RowStatus::TerminalApproaching => StatusCategory::Approaching,
            RowStatus::Arrived | RowStatus::TerminalArrived => StatusCategory::Arrived,
            RowStatus::Stopped | RowStatus::TerminalStopped => StatusCategory::Stopped,
            RowStatus::Departed => StatusCategory::Departed,
            RowStatus::Passed => StatusCategory::Passing,
        }
    }
}

/// One-shot events fired at most once per row, for the collaborator to map
/// to a sound or other effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Arrival,
    PreApproach,
    Departed,
    Pass,
}

/// Which cues a row has already fired. Flags are monotone: once set they
/// stay set for the lifetime of the row.
#[derive(Debug, Clone, Copy, Default)]
struct PlayedCues {
    arrival: bool,
    pre_approach: bool,
    departed: bool,
    pass: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Badges {
    /// 次発: first window slot only.
    pub next: bool,
    /// 始発: from the record.
    pub first: bool,
    /// 終電: from the record, or auto-tagged on the last slot when nothing
    /// further is upcoming.
    pub last: bool,
}

/// A currently displayed row with its lifecycle state.
#[derive(Debug, Clone)]
pub struct VisibleEntry {
    pub id: RowId,
    pub record: DepartureRecord,
    pub effective_time: DateTime<Local>,
    pub kind: TrainKind,
    pub is_delayed: bool,
    pub status: RowStatus,
    pub badges: Badges,
    dwell_until: Option<DateTime<Local>>,
    post_depart_at: Option<DateTime<Local>>,
    played: PlayedCues,
    last_delta: Option<i64>,
}

/// What changed during one `tick` or `load` step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub added: Vec<RowId>,
    pub removed: Vec<RowId>,
    pub updated: Vec<RowId>,
    pub cues: Vec<Cue>,
}

pub struct BoardEngine {
    thresholds: Thresholds,
    schedule: Schedule,
    window: Vec<VisibleEntry>,
    notice: Option<String>,
    service_ended: bool,
    next_id: u64,
}

impl BoardEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        BoardEngine {
            thresholds,
            schedule: Schedule::default(),
            window: Vec::new(),
            notice: None,
            service_ended: false,
            next_id: 0,
        }
    }

    /// The visible window, in display order.
    pub fn rows(&self) -> &[VisibleEntry] {
        &self.window
    }

    /// The shared platform notice, active while a pass-through train is
    /// near. At most one is active; the latest window row wins.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Whether the board has nothing left to show today.
    pub fn is_service_ended(&self) -> bool {
        self.service_ended
    }

    /// Replaces the schedule and rebuilds the window from scratch.
    ///
    /// Reload never merges: every visible row is dropped and the window
    /// refills from the front of the new schedule.
    pub fn load(&mut self, records: Vec<DepartureRecord>, now: DateTime<Local>) -> TickOutcome {
        let removed = self.window.iter().map(|entry| entry.id).collect();
        self.schedule = Schedule::rebuild(records, now);
        self.window.clear();
        self.notice = None;
        let added = self.fill(now);
        TickOutcome {
            added,
            removed,
            ..TickOutcome::default()
        }
    }

    /// Advances every visible row one step against `now`.
    ///
    /// Order per row: removal policy, then status, then one-shot cue
    /// crossings, then `last_delta` update (survivors only). Afterwards
    /// the notice is recomputed, the window refills and badges re-tag,
    /// whether or not anything was removed.
    pub fn tick(&mut self, now: DateTime<Local>) -> TickOutcome {
        let approach = i64::from(self.thresholds.approach_before_secs);
        let arrival = i64::from(self.thresholds.arrival_before_secs);
        let stop = i64::from(self.thresholds.stop_before_secs);
        let remove_after = i64::from(self.thresholds.remove_after_secs);
        let pass_remove_after = i64::from(self.thresholds.pass_remove_after_secs);

        let mut outcome = TickOutcome::default();
        let previous: Vec<(RowId, RowStatus, Badges)> = self
            .window
            .iter()
            .map(|entry| (entry.id, entry.status, entry.badges))
            .collect();

        let window = std::mem::take(&mut self.window);
        let mut survivors = Vec::with_capacity(window.len());
        for mut entry in window {
            let delta = (entry.effective_time - now).num_seconds();

            let removed = match entry.kind {
                TrainKind::TerminalHere => {
                    if entry.dwell_until.is_none() && delta <= 0 {
                        entry.dwell_until =
                            Some(entry.effective_time + Duration::seconds(TERMINAL_DWELL_SECS));
                    }
                    match entry.dwell_until {
                        Some(dwell) if now >= dwell => {
                            let since = *entry.post_depart_at.get_or_insert(now);
                            (now - since).num_seconds() >= remove_after
                        }
                        _ => false,
                    }
                }
                TrainKind::PassThrough => delta <= -pass_remove_after,
                TrainKind::Regular => delta <= -remove_after,
            };
            if removed {
                outcome.removed.push(entry.id);
                continue;
            }

            entry.status = if delta >= 0 {
                match entry.kind {
                    TrainKind::TerminalHere => {
                        if delta <= stop {
                            RowStatus::TerminalStopped
                        } else if delta <= arrival {
                            RowStatus::TerminalArrived
                        } else if delta <= approach {
                            RowStatus::TerminalApproaching
                        } else if entry.is_delayed {
                            RowStatus::Delayed
                        } else {
                            RowStatus::OnTime
                        }
                    }
                    // Pass-through trains skip the tighter tiers: a single
                    // approach window, then on-time/delayed.
                    TrainKind::PassThrough => {
                        if delta <= approach {
                            RowStatus::Approaching
                        } else if entry.is_delayed {
                            RowStatus::Delayed
                        } else {
                            RowStatus::OnTime
                        }
                    }
                    TrainKind::Regular => {
                        if delta <= stop {
                            RowStatus::Stopped
                        } else if delta <= arrival {
                            RowStatus::Arrived
                        } else if delta <= approach {
                            RowStatus::Approaching
                        } else if entry.is_delayed {
                            RowStatus::Delayed
                        } else {
                            RowStatus::OnTime
                        }
                    }
                }
            } else {
                match entry.kind {
                    TrainKind::TerminalHere => match entry.dwell_until {
                        Some(dwell) if now >= dwell => RowStatus::Departed,
                        _ => RowStatus::TerminalStopped,
                    },
                    TrainKind::PassThrough => RowStatus::Passed,
                    TrainKind::Regular => {
                        if !entry.played.departed {
                            entry.played.departed = true;
                            outcome.cues.push(Cue::Departed);
                        }
                        RowStatus::Departed
                    }
                }
            };

            // Threshold crossings fire the first time the previous tick's
            // delta was above a threshold and this tick's is at or below it.
            if let Some(last) = entry.last_delta {
                if last > approach && delta <= approach && !entry.played.pre_approach {
                    entry.played.pre_approach = true;
                    outcome.cues.push(Cue::PreApproach);
                }
                if last > arrival && delta <= arrival && !entry.played.arrival {
                    entry.played.arrival = true;
                    outcome.cues.push(Cue::Arrival);
                }
                if entry.kind == TrainKind::PassThrough
                    && last > 0
                    && delta <= 0
                    && !entry.played.pass
                {
                    entry.played.pass = true;
                    outcome.cues.push(Cue::Pass);
                }
            }

            entry.last_delta = Some(delta);
            survivors.push(entry);
        }

        // Single-slot notice, recomputed from scratch: the latest active
        // pass-through row wins, and a removed writer clears it.
        let mut notice = None;
        for entry in &survivors {
            if entry.kind != TrainKind::PassThrough {
                continue;
            }
            let Some(delta) = entry.last_delta else {
                continue;
            };
            let active =
                (0 <= delta && delta <= approach) || (-pass_remove_after < delta && delta < 0);
            if active {
                notice = Some(format!("{}番線に列車が通過します", entry.record.platform));
            }
        }
        self.notice = notice;

        self.window = survivors;
        outcome.added = self.fill(now);

        for (id, old_status, old_badges) in previous {
            if let Some(entry) = self.window.iter().find(|entry| entry.id == id) {
                if entry.status != old_status || entry.badges != old_badges {
                    outcome.updated.push(id);
                }
            }
        }
        outcome
    }

    /// Tops the window back up to six rows and re-tags badges. Also
    /// refreshes the cached end-of-service state.
    fn fill(&mut self, now: DateTime<Local>) -> Vec<RowId> {
        let mut added = Vec::new();
        while self.window.len() < WINDOW_ROWS {
            let Some(entry) = self.schedule.take_next_eligible(now) else {
                break;
            };
            let id = self.next_id;
            self.next_id += 1;
            let kind = TrainKind::of(&entry.record);
            let is_delayed = entry.record.is_delayed();
            self.window.push(VisibleEntry {
                id,
                kind,
                is_delayed,
                effective_time: entry.effective_time,
                record: entry.record,
                status: if is_delayed {
                    RowStatus::Delayed
                } else {
                    RowStatus::OnTime
                },
                badges: Badges::default(),
                dwell_until: None,
                post_depart_at: None,
                played: PlayedCues::default(),
                last_delta: None,
            });
            added.push(id);
        }

        let any_future = self.schedule.has_upcoming(now);
        let count = self.window.len();
        for (index, entry) in self.window.iter_mut().enumerate() {
            entry.badges = Badges {
                next: index == 0,
                first: entry.record.first,
                last: entry.record.last || (index + 1 == count && !any_future),
            };
        }

        self.service_ended = self.window.is_empty() && !any_future;
        added
    }
}
