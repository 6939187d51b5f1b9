//! Ports - 差し替え可能な依存
//!
//! スケジューラが外から受け取るもの（ID 生成・時刻）を trait で抽象化します。

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, SequentialIdGenerator, UlidGenerator};
