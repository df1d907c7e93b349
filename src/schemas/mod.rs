pub mod answer_source;
pub mod chat_record;
pub mod llm_frame;
