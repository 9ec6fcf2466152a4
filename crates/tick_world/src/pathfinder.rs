//! Path search wrapper.
//!
//! The search itself is an external [`SearchOracle`]. This module fills in
//! defaults, clamps caller options into the ranges the oracle accepts and turns
//! its raw answer into an origin-to-goal path.

use serde::{Deserialize, Serialize};

use crate::position::RoomPosition;

pub const DEFAULT_PLAIN_COST: u32 = 1;
pub const DEFAULT_SWAMP_COST: u32 = 5;
pub const DEFAULT_HEURISTIC_WEIGHT: f64 = 1.0;
pub const DEFAULT_MAX_OPS: u32 = 2000;
pub const DEFAULT_MAX_ROOMS: u32 = 64;

const COST_RANGE: (u32, u32) = (1, 254);
const HEURISTIC_RANGE: (f64, f64) = (1.0, 9.0);
const OPS_RANGE: (u32, u32) = (1, 2000);
const ROOMS_RANGE: (u32, u32) = (1, 64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchGoal {
    pub pos: RoomPosition,
    pub range: u32,
}

impl From<RoomPosition> for SearchGoal {
    fn from(pos: RoomPosition) -> Self {
        Self { pos, range: 0 }
    }
}

/// Caller options. Unset fields take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchOptions {
    pub plain_cost: Option<u32>,
    pub swamp_cost: Option<u32>,
    pub heuristic_weight: Option<f64>,
    pub max_ops: Option<u32>,
    pub max_cost: Option<u32>,
    pub max_rooms: Option<u32>,
    pub flee: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchCosts {
    pub plain: u32,
    pub swamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    pub heuristic_weight: f64,
    pub max_ops: u32,
    pub max_cost: u32,
    pub max_rooms: u32,
    pub flee: bool,
}

/// Answer from the oracle. A found path runs from the goal back to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleOutcome {
    NoPath,
    Incomplete { ops: u32 },
    Found { reversed_path: Vec<RoomPosition>, ops: u32, cost: u32 },
}

/// Rooms for which the callback returns `false` are skipped.
pub type RoomCallback<'a> = &'a (dyn Fn(&str) -> bool + Sync);

pub trait SearchOracle: Send + Sync {
    fn search(
        &self,
        origin: RoomPosition,
        goals: &[SearchGoal],
        room_callback: Option<RoomCallback<'_>>,
        costs: SearchCosts,
        limits: SearchLimits,
    ) -> OracleOutcome;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: Vec<RoomPosition>,
    pub ops: u32,
    pub cost: u32,
    pub incomplete: bool,
}

fn clamp_u32(value: u32, (low, high): (u32, u32)) -> u32 {
    value.clamp(low, high)
}

pub fn resolve_options(options: &SearchOptions) -> (SearchCosts, SearchLimits) {
    let costs = SearchCosts {
        plain: clamp_u32(options.plain_cost.unwrap_or(DEFAULT_PLAIN_COST), COST_RANGE),
        swamp: clamp_u32(options.swamp_cost.unwrap_or(DEFAULT_SWAMP_COST), COST_RANGE),
    };
    let heuristic = options
        .heuristic_weight
        .filter(|weight| weight.is_finite())
        .unwrap_or(DEFAULT_HEURISTIC_WEIGHT)
        .clamp(HEURISTIC_RANGE.0, HEURISTIC_RANGE.1);
    let limits = SearchLimits {
        heuristic_weight: heuristic,
        max_ops: clamp_u32(options.max_ops.unwrap_or(DEFAULT_MAX_OPS), OPS_RANGE),
        max_cost: options.max_cost.unwrap_or(u32::MAX),
        max_rooms: clamp_u32(options.max_rooms.unwrap_or(DEFAULT_MAX_ROOMS), ROOMS_RANGE),
        flee: options.flee,
    };
    (costs, limits)
}

pub fn search(
    oracle: &dyn SearchOracle,
    origin: RoomPosition,
    goals: &[SearchGoal],
    room_callback: Option<RoomCallback<'_>>,
    options: &SearchOptions,
) -> SearchResult {
    let (costs, limits) = resolve_options(options);
    match oracle.search(origin, goals, room_callback, costs, limits) {
        OracleOutcome::NoPath => SearchResult::default(),
        OracleOutcome::Incomplete { ops } => SearchResult {
            ops,
            incomplete: true,
            ..SearchResult::default()
        },
        OracleOutcome::Found {
            mut reversed_path,
            ops,
            cost,
        } => {
            reversed_path.reverse();
            SearchResult {
                path: reversed_path,
                ops,
                cost,
                incomplete: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Walks along x inside the origin room and records what it was asked.
    #[derive(Default)]
    struct LineOracle {
        seen: Mutex<Option<(SearchCosts, SearchLimits, Vec<SearchGoal>)>>,
        vetoed: Mutex<bool>,
    }

    impl SearchOracle for LineOracle {
        fn search(
            &self,
            origin: RoomPosition,
            goals: &[SearchGoal],
            room_callback: Option<RoomCallback<'_>>,
            costs: SearchCosts,
            limits: SearchLimits,
        ) -> OracleOutcome {
            *self.seen.lock() = Some((costs, limits, goals.to_vec()));
            if let Some(callback) = room_callback {
                if !callback(&origin.room_name()) {
                    *self.vetoed.lock() = true;
                    return OracleOutcome::NoPath;
                }
            }
            let Some(goal) = goals.first() else {
                return OracleOutcome::NoPath;
            };
            if goal.pos.room() != origin.room() {
                return OracleOutcome::Incomplete { ops: limits.max_ops };
            }
            let mut path = Vec::new();
            let mut x = goal.pos.x();
            while x != origin.x() {
                path.push(RoomPosition::new(origin.room(), x, origin.y()).unwrap());
                x = if x > origin.x() { x - 1 } else { x + 1 };
            }
            let cost = path.len() as u32 * costs.plain;
            OracleOutcome::Found {
                reversed_path: path,
                ops: 3,
                cost,
            }
        }
    }

    fn pos(room: &str, x: u8, y: u8) -> RoomPosition {
        RoomPosition::in_room(room, x, y).unwrap()
    }

    #[test]
    fn defaults_and_clamps() {
        let (costs, limits) = resolve_options(&SearchOptions::default());
        assert_eq!(costs, SearchCosts { plain: 1, swamp: 5 });
        assert_eq!(limits.max_ops, 2000);
        assert_eq!(limits.max_cost, u32::MAX);
        assert_eq!(limits.max_rooms, 64);
        assert_eq!(limits.heuristic_weight, 1.0);

        let (costs, limits) = resolve_options(&SearchOptions {
            plain_cost: Some(0),
            swamp_cost: Some(900),
            heuristic_weight: Some(20.0),
            max_ops: Some(0),
            max_rooms: Some(100),
            ..SearchOptions::default()
        });
        assert_eq!(costs, SearchCosts { plain: 1, swamp: 254 });
        assert_eq!(limits.heuristic_weight, 9.0);
        assert_eq!(limits.max_ops, 1);
        assert_eq!(limits.max_rooms, 64);
    }

    #[test]
    fn found_paths_run_from_origin_to_goal() {
        let oracle = LineOracle::default();
        let origin = pos("W1N1", 10, 10);
        let result = search(
            &oracle,
            origin,
            &[pos("W1N1", 13, 10).into()],
            None,
            &SearchOptions::default(),
        );
        assert!(!result.incomplete);
        assert_eq!(
            result.path,
            vec![pos("W1N1", 11, 10), pos("W1N1", 12, 10), pos("W1N1", 13, 10)]
        );
        assert_eq!(result.cost, 3);
        let seen = oracle.seen.lock().clone().unwrap();
        assert_eq!(seen.2[0].range, 0);
    }

    #[test]
    fn incomplete_and_vetoed_searches_are_empty() {
        let oracle = LineOracle::default();
        let origin = pos("W1N1", 10, 10);
        let result = search(
            &oracle,
            origin,
            &[pos("W2N1", 10, 10).into()],
            None,
            &SearchOptions::default(),
        );
        assert!(result.incomplete);
        assert!(result.path.is_empty());

        let veto = |_: &str| false;
        let result = search(
            &oracle,
            origin,
            &[pos("W1N1", 12, 10).into()],
            Some(&veto),
            &SearchOptions::default(),
        );
        assert_eq!(result, SearchResult::default());
        assert!(*oracle.vetoed.lock());
    }
}
