//! Weather Server
//!
//! Reports current conditions from a fixed table of stations. The tool is
//! registered with an async handler.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::mcp::error::{HandlerError, HandlerResult, Result};
use crate::mcp::protocol::{Content, ResourceResult, ToolResult};
use crate::mcp::registry::{Registry, ResourceSpec, ToolContext, ToolSpec};
use crate::mcp::schema::{Field, Schema};
use crate::mcp::server::ServerComponents;

pub const STATIONS_URI: &str = "weather://stations";

struct Station {
    city: &'static str,
    celsius: f64,
    conditions: &'static str,
    humidity: u8,
}

const STATIONS: &[Station] = &[
    Station { city: "London", celsius: 11.0, conditions: "Overcast", humidity: 81 },
    Station { city: "Paris", celsius: 14.5, conditions: "Partly cloudy", humidity: 70 },
    Station { city: "New York", celsius: 18.0, conditions: "Sunny", humidity: 55 },
    Station { city: "Tokyo", celsius: 21.0, conditions: "Light rain", humidity: 77 },
    Station { city: "Sydney", celsius: 23.5, conditions: "Clear", humidity: 60 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum Units {
    Celsius,
    Fahrenheit,
}

impl Units {
    fn convert(self, celsius: f64) -> f64 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
        }
    }
}

#[derive(Deserialize)]
struct WeatherArgs {
    city: String,
    units: Units,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WeatherServer;

impl ServerComponents for WeatherServer {
    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register_tool(
            "get_weather",
            ToolSpec::new("Get the current weather for a city")
                .input(
                    Schema::object()
                        .field(Field::string("city").describe("City name, e.g. \"London\""))
                        .field(
                            Field::string("units")
                                .describe("Temperature units")
                                .one_of(["celsius", "fahrenheit"])
                                .default_value("celsius"),
                        ),
                )
                .output(
                    Schema::object()
                        .field(Field::string("city"))
                        .field(Field::number("temperature"))
                        .field(Field::string("units"))
                        .field(Field::string("conditions"))
                        .field(Field::integer("humidity").min(0.0).max(100.0)),
                ),
            get_weather,
        )?;

        registry.register_sync_resource(
            "weather-stations",
            STATIONS_URI,
            ResourceSpec::new("Cities with a weather station").mime_type("application/json"),
            || {
                let cities: Vec<&str> = STATIONS.iter().map(|s| s.city).collect();
                Ok(ResourceResult::text(
                    STATIONS_URI,
                    "application/json",
                    json!({ "stations": cities }).to_string(),
                ))
            },
        )
    }
}

async fn get_weather(args: Value, _ctx: ToolContext) -> HandlerResult<ToolResult> {
    let args: WeatherArgs = serde_json::from_value(args)?;
    let station = STATIONS
        .iter()
        .find(|s| s.city.eq_ignore_ascii_case(args.city.trim()))
        .ok_or_else(|| HandlerError::new(format!("No weather station for '{}'", args.city)))?;

    let temperature = args.units.convert(station.celsius);
    let summary = format!(
        "{}: {}, {:.1}{}, humidity {}%",
        station.city,
        station.conditions,
        temperature,
        args.units.symbol(),
        station.humidity
    );

    Ok(ToolResult {
        content: vec![Content::text(summary)],
        structured_content: Some(json!({
            "city": station.city,
            "temperature": temperature,
            "units": args.units,
            "conditions": station.conditions,
            "humidity": station.humidity
        })),
        is_error: false,
    })
}
