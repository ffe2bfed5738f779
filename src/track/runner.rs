//! Per-color tracking state machine.
//!
//! The first frame seeds identities from a plain bipartite match of the
//! cost grid; every later frame runs the temporal 3-partite assignment
//! against the previous endpoints. Colors never share state, so one runner
//! exists per color and failures stay contained to it.

use tracing::debug;

use crate::assign::{bipartite, temporal};
use crate::calib::{StereoRig, WorldTransform};
use crate::correspond::{build_pair_grid, Detection2D, PairGrid};
use crate::error::{Error, Result};
use crate::track::{RodRow, TrackedRod};

/// Lifecycle of a per-color run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No frames consumed yet.
    Uninitialized,
    /// First frame matched, identities numbered.
    Seeded,
    /// At least one temporal assignment done.
    Tracking,
    /// `finish` called; further frames are rejected.
    Done,
}

impl Default for RunnerState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

pub struct TrackRunner {
    color: String,
    rig: StereoRig,
    world: WorldTransform,
    state: RunnerState,
    rods: Vec<TrackedRod>,
}

impl TrackRunner {
    pub fn new(color: impl Into<String>, rig: StereoRig, world: WorldTransform) -> Self {
        Self {
            color: color.into(),
            rig,
            world,
            state: RunnerState::default(),
            rods: Vec::new(),
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Number of identities fixed at seeding.
    pub fn particle_count(&self) -> usize {
        self.rods.len()
    }

    /// Consume one frame's detections and emit one row per identity.
    pub fn process_frame(
        &mut self,
        frame: u32,
        cam1: &[Detection2D],
        cam2: &[Detection2D],
    ) -> Result<Vec<RodRow>> {
        match self.state {
            RunnerState::Done => Err(Error::Finished {
                color: self.color.clone(),
            }),
            RunnerState::Uninitialized => {
                let grid = build_pair_grid(&self.rig, &self.world, cam1, cam2);
                self.seed(frame, &grid, cam1, cam2)
            }
            RunnerState::Seeded | RunnerState::Tracking => {
                let grid = build_pair_grid(&self.rig, &self.world, cam1, cam2);
                self.advance(frame, &grid, cam1, cam2)
            }
        }
    }

    /// Seal the run. Idempotent.
    pub fn finish(&mut self) {
        self.state = RunnerState::Done;
    }

    fn seed(
        &mut self,
        frame: u32,
        grid: &PairGrid,
        cam1: &[Detection2D],
        cam2: &[Detection2D],
    ) -> Result<Vec<RodRow>> {
        let matched = bipartite::solve_min(grid.costs.view());
        debug!(
            frame,
            color = %self.color,
            particles = matched.assignments.len(),
            "seeding identities"
        );

        let mut rows = Vec::with_capacity(matched.assignments.len());
        // assignments come back ordered by camera-1 index; identities are
        // renumbered 0.. in that order
        for (particle, &(i, j)) in matched.assignments.iter().enumerate() {
            let choice: u8 = if grid.straight[[i, j]] { 0 } else { 1 };
            let pair = &grid.pairs[i][j];
            let e1 = pair.points[choice as usize];
            let e2 = pair.points[3 - choice as usize];
            rows.push(RodRow::from_match(
                frame, &self.color, particle, e1, e2, choice, &cam1[i], &cam2[j],
            ));
            self.rods.push(TrackedRod {
                particle,
                endpoints: (e1, e2),
            });
        }
        self.state = RunnerState::Seeded;
        Ok(rows)
    }

    fn advance(
        &mut self,
        frame: u32,
        grid: &PairGrid,
        cam1: &[Detection2D],
        cam2: &[Detection2D],
    ) -> Result<Vec<RodRow>> {
        let prev: Vec<_> = self.rods.iter().map(|r| r.endpoints).collect();
        let matches = temporal::solve(&prev, grid, frame, &self.color)?;

        let mut rows = Vec::with_capacity(matches.len());
        for m in &matches {
            let pair = &grid.pairs[m.cam1][m.cam2];
            let e1 = pair.points[m.choice as usize];
            let e2 = pair.points[3 - m.choice as usize];
            rows.push(RodRow::from_match(
                frame,
                &self.color,
                self.rods[m.identity].particle,
                e1,
                e2,
                m.choice,
                &cam1[m.cam1],
                &cam2[m.cam2],
            ));
            self.rods[m.identity].endpoints = (e1, e2);
        }
        self.state = RunnerState::Tracking;
        Ok(rows)
    }
}
