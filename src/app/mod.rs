pub mod dispatch;
pub mod replay;
