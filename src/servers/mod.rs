//! Demo servers
//!
//! Each server is a `ServerComponents` implementation that registers its
//! tools and resources on a `BaseServer`. The binary picks one by name.

pub mod calculator;
pub mod greetings;
pub mod weather;

pub use calculator::CalculatorServer;
pub use greetings::GreetingsServer;
pub use weather::WeatherServer;

use crate::mcp::server::ServerComponents;

/// Names accepted by `example_server`.
pub const EXAMPLE_SERVERS: [&str; 3] = ["greetings", "weather", "calculator"];

/// Look up a demo server by name (case-insensitive).
pub fn example_server(name: &str) -> Option<Box<dyn ServerComponents>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "greetings" => Some(Box::new(GreetingsServer)),
        "weather" => Some(Box::new(WeatherServer)),
        "calculator" => Some(Box::new(CalculatorServer)),
        _ => None,
    }
}
