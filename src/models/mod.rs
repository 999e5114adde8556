pub mod alert;
pub mod courier;
pub mod decision;
pub mod order;
pub mod tenant;
