pub mod api_response;
pub mod category;
pub mod notification;
pub mod units;
