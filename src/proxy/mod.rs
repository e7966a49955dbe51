pub mod handler;
pub mod router;


pub use handler::RequestHandler;
pub use router::RouteTable;
