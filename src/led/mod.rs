//! LED output: single indicators and the multi-LED dimming countdown

pub mod dimmer;
pub mod indicator;

pub use dimmer::{DimCycle, DimOutcome, DimTiming};
pub use indicator::{LedIndicator, LedState, DIM_PWM_HZ};
