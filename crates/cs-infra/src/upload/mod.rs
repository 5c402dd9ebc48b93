mod session;

pub use session::UploadSession;
