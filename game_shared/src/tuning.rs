//! Physics tuning parameters.
//!
//! Values are stored as fixed-point hundredths so that two parameter sets
//! compare bit-exactly and the wire form is a flat list of integers.

use serde::{Deserialize, Serialize};

/// One tuning value in hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TuneValue(pub i32);

impl TuneValue {
    pub fn from_f32(v: f32) -> Self {
        TuneValue((v * 100.0).round() as i32)
    }

    pub fn as_f32(self) -> f32 {
        self.0 as f32 / 100.0
    }
}

macro_rules! tuning_params {
    ($( $field:ident = $default:expr ),* $(,)?) => {
        /// The full set of tunable physics parameters.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub struct TuningParams {
            $( pub $field: TuneValue, )*
        }

        impl Default for TuningParams {
            fn default() -> Self {
                Self {
                    $( $field: TuneValue::from_f32($default), )*
                }
            }
        }

        /// Parameter names in wire order.
        pub const TUNING_NAMES: &[&str] = &[$( stringify!($field) ),*];

        impl TuningParams {
            /// Sets a parameter by name. Returns `false` for unknown names.
            pub fn set(&mut self, name: &str, value: f32) -> bool {
                match name {
                    $( stringify!($field) => {
                        self.$field = TuneValue::from_f32(value);
                        true
                    } )*
                    _ => false,
                }
            }

            pub fn get(&self, name: &str) -> Option<f32> {
                match name {
                    $( stringify!($field) => Some(self.$field.as_f32()), )*
                    _ => None,
                }
            }

            /// Raw values in wire order.
            pub fn to_wire(&self) -> [i32; NUM_TUNING_PARAMS] {
                [$( self.$field.0 ),*]
            }
        }
    };
}

tuning_params! {
    ground_control_speed = 10.0,
    ground_control_accel = 100.0 / 50.0,
    ground_friction = 0.5,
    ground_jump_impulse = 13.2,
    air_jump_impulse = 12.0,
    air_control_speed = 250.0 / 50.0,
    air_control_accel = 1.5,
    air_friction = 0.95,
    hook_length = 380.0,
    hook_fire_speed = 80.0,
    hook_drag_accel = 3.0,
    hook_drag_speed = 15.0,
    gravity = 0.5,
    velramp_start = 550.0,
    velramp_range = 2000.0,
    velramp_curvature = 1.4,
    gun_curvature = 1.25,
    gun_speed = 2200.0,
    gun_lifetime = 2.0,
    shotgun_curvature = 1.25,
    shotgun_speed = 2750.0,
    shotgun_speeddiff = 0.8,
    shotgun_lifetime = 0.20,
    grenade_curvature = 7.0,
    grenade_speed = 1000.0,
    grenade_lifetime = 2.0,
    laser_reach = 800.0,
    laser_bounce_delay = 150.0,
    laser_bounce_num = 1.0,
    laser_bounce_cost = 0.0,
    player_collision = 1.0,
    player_hooking = 1.0,
}

pub const NUM_TUNING_PARAMS: usize = 32;

impl TuningParams {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Name and value at a wire index.
    pub fn get_index(&self, index: usize) -> Option<(&'static str, f32)> {
        let name = TUNING_NAMES.get(index)?;
        self.get(name).map(|v| (*name, v))
    }

    /// Parameters sent to frozen players: every movement input has no effect.
    pub fn frozen() -> Self {
        let zero = TuneValue(0);
        Self {
            ground_control_speed: zero,
            ground_jump_impulse: zero,
            ground_control_accel: zero,
            air_control_speed: zero,
            air_jump_impulse: zero,
            air_control_accel: zero,
            hook_drag_speed: zero,
            hook_drag_accel: zero,
            hook_fire_speed: zero,
            ..Self::default()
        }
    }
}
