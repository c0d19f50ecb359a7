//! Per-frame interpolation with an explicit settle condition

use super::viewport::ViewportState;

/// Whether an animation wants another frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Running,
    Settled,
}

impl Tick {
    pub fn is_running(self) -> bool {
        self == Tick::Running
    }

    /// Running if either side is
    pub fn or(self, other: Tick) -> Tick {
        if self.is_running() || other.is_running() {
            Tick::Running
        } else {
            Tick::Settled
        }
    }
}

/// Exponential approach: each tick covers `rate` of the remaining distance,
/// and snaps to the target once within `epsilon`.
#[derive(Clone, Copy, Debug)]
pub struct Tween {
    value: f64,
    target: f64,
    rate: f64,
    epsilon: f64,
}

impl Tween {
    pub fn new(value: f64, rate: f64, epsilon: f64) -> Self {
        Self {
            value,
            target: value,
            rate,
            epsilon,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn retarget(&mut self, target: f64) {
        self.target = target;
    }

    /// Jump to `value` and keep animating toward the current target
    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }

    pub fn is_settled(&self) -> bool {
        self.value == self.target
    }

    pub fn tick(&mut self) -> Tick {
        if self.is_settled() {
            return Tick::Settled;
        }
        self.value += (self.target - self.value) * self.rate;
        if (self.target - self.value).abs() <= self.epsilon {
            self.value = self.target;
            Tick::Settled
        } else {
            Tick::Running
        }
    }
}

/// Animated camera move toward a fixed state
#[derive(Clone, Copy, Debug)]
pub struct CameraTween {
    offset_x: Tween,
    offset_y: Tween,
    scale: Tween,
}

impl CameraTween {
    pub fn new(from: ViewportState, to: ViewportState, rate: f64) -> Self {
        let tween = |a: f64, b: f64, epsilon: f64| {
            let mut t = Tween::new(a, rate, epsilon);
            t.retarget(b);
            t
        };
        Self {
            offset_x: tween(from.offset_x, to.offset_x, 0.5),
            offset_y: tween(from.offset_y, to.offset_y, 0.5),
            scale: tween(from.scale, to.scale, 0.001),
        }
    }

    pub fn state(&self) -> ViewportState {
        ViewportState {
            offset_x: self.offset_x.value(),
            offset_y: self.offset_y.value(),
            scale: self.scale.value(),
        }
    }

    pub fn tick(&mut self) -> Tick {
        self.offset_x
            .tick()
            .or(self.offset_y.tick())
            .or(self.scale.tick())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tween_settles_on_target() {
        let mut tween = Tween::new(1.0, 0.1, 0.01);
        tween.retarget(1.2);

        let mut frames = 0;
        while tween.tick().is_running() {
            frames += 1;
            assert!(frames < 1000, "tween never settled");
        }
        assert_eq!(tween.value(), 1.2);
        assert!(frames > 1);
        assert_eq!(tween.tick(), Tick::Settled);
    }

    #[test]
    fn test_tween_moves_monotonically() {
        let mut tween = Tween::new(1.2, 0.1, 0.01);
        tween.retarget(1.0);
        let mut last = tween.value();
        while tween.tick().is_running() {
            assert!(tween.value() < last);
            last = tween.value();
        }
    }

    #[test]
    fn test_camera_tween_reaches_state() {
        let from = ViewportState {
            offset_x: -900.0,
            offset_y: 400.0,
            scale: 1.9,
        };
        let to = ViewportState {
            offset_x: 320.0,
            offset_y: 180.0,
            scale: 1.0,
        };
        let mut tween = CameraTween::new(from, to, 0.15);
        let mut frames = 0;
        while tween.tick().is_running() {
            frames += 1;
            assert!(frames < 1000);
        }
        assert_eq!(tween.state(), to);
    }
}
