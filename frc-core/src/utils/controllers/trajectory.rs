//! Trajectory-following command glue.
//!
//! Trajectory generation, the tracking law and pose estimation are supplied
//! by an external library; this module only sequences them through the
//! command lifecycle (initialize, execute, is_finished, end).

/// Wheel velocities and feedforward voltages requested by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackerOutput {
    pub left_velocity: f64,
    pub right_velocity: f64,
    pub left_feedforward_voltage: f64,
    pub right_feedforward_voltage: f64,
}

pub trait TrajectoryTracker {
    type Trajectory;
    type Pose;

    fn reset(
        &mut self,
        trajectory: Self::Trajectory,
    );

    fn next_state(
        &mut self,
        pose: &Self::Pose,
        time: f64,
    ) -> TrackerOutput;

    fn is_finished(&self) -> bool;

    /// Pose the tracker is currently chasing, if any.
    fn reference_pose(&self) -> Option<Self::Pose>;
}

pub trait Localization {
    type Pose;

    fn robot_position(&self) -> Self::Pose;
}

/// Closed-loop drivetrain velocity output.
pub trait VelocityDrive {
    type Error: core::fmt::Debug;

    fn set_output(
        &mut self,
        output: &TrackerOutput,
    ) -> Result<(), Self::Error>;

    fn zero_outputs(&mut self) -> Result<(), Self::Error>;
}

/// Follows one pre-generated trajectory.
pub struct TrajectoryCommand<T: TrajectoryTracker> {
    tracker: T,
    trajectory: Option<T::Trajectory>,
    following: bool,
}

impl<T: TrajectoryTracker> TrajectoryCommand<T> {
    pub fn new(
        tracker: T,
        trajectory: T::Trajectory,
    ) -> Self {
        TrajectoryCommand {
            tracker,
            trajectory: Some(trajectory),
            following: false,
        }
    }

    /// Hand the trajectory to the tracker. A second call is a no-op.
    pub fn initialize(&mut self) {
        if let Some(trajectory) = self.trajectory.take() {
            self.tracker.reset(trajectory);
            self.following = true;
            tracing::info!("trajectory following started");
        }
    }

    /// Feed the current pose to the tracker and forward its output.
    ///
    /// Returns the reference pose for display.
    pub fn execute<L, D>(
        &mut self,
        localization: &L,
        drive: &mut D,
        time: f64,
    ) -> Result<Option<T::Pose>, D::Error>
    where
        L: Localization<Pose = T::Pose>,
        D: VelocityDrive,
    {
        let pose = localization.robot_position();
        let output = self.tracker.next_state(&pose, time);
        drive.set_output(&output)?;
        Ok(self.tracker.reference_pose())
    }

    pub fn is_finished(&self) -> bool {
        self.tracker.is_finished()
    }

    pub fn is_following(&self) -> bool {
        self.following
    }

    pub fn end<D: VelocityDrive>(
        &mut self,
        drive: &mut D,
    ) -> Result<(), D::Error> {
        self.following = false;
        tracing::info!("trajectory following ended");
        drive.zero_outputs()
    }
}
