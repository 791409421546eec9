pub mod config;
pub mod error;
pub mod event;
pub mod json_parse;
pub mod logger;
pub mod loop_;
pub mod loop_detector;
pub mod message;
pub mod parallel;
pub mod provider;
pub mod providers;
pub mod proxy;
pub mod queue;
pub mod tools;
pub mod transform;

pub use config::AgentLoopConfig;
pub use error::AgentError;
pub use event::{collect, EventStream, StreamEvent};
pub use loop_::{Agent, AgentState};
pub use message::{AssistantMessage, Context, Message, ToolDescriptor};
pub use provider::Provider;
