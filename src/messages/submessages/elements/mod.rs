pub mod parameter;
pub mod parameter_list;
pub mod serialized_payload;
