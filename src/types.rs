//! Common type aliases used throughout the application.

use crate::core::Measurement;
use tokio::sync::broadcast;

pub type MeasurementSender = broadcast::Sender<Measurement>;
pub type MeasurementReceiver = broadcast::Receiver<Measurement>;
