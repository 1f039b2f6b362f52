//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements  | Connects to                  |
//! |-------------|-------------|------------------------------|
//! | `json_sink` | EventSink   | MQTT-style JSON state topics |
//! | `log_sink`  | EventSink   | Serial log output            |
//! | `nvs`       | StoragePort | NVS / in-memory store        |
//! | `time`      | Clock       | ESP32 high-resolution timer  |

pub mod json_sink;
pub mod log_sink;
pub mod nvs;
pub mod time;
