//! 访问运行中服务器的HTTP客户端

mod remote;

pub use remote::RemoteClient;
