#[allow(dead_code)] // extra well-known constants are not harmful
pub mod constant;

pub mod flow_control;
pub mod fragment_assembler;
pub mod message_receiver;
pub mod reader;
pub mod reader_proxy;
pub mod stateless_reader;
pub mod stateless_writer;
pub mod writer;
pub mod writer_proxy;

pub mod message;
pub use message::{Message, MessageBuilder};

pub mod submessage;
pub use submessage::{Submessage, SubmessageBody};
