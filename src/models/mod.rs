mod article;
mod page;

pub use article::{Article, DeliveryState, DeliveryStatus, ExtractedContent};
pub use page::Page;
