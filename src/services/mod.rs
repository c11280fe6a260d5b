// 服务层
//
// - registry: 服务器注册表 (ServerRegistry)
// - executor: 远程命令执行 (RemoteExecutor)
// - storage: JSON 文件持久化

pub mod executor;
pub mod registry;
pub mod storage;

pub use executor::RemoteExecutor;
pub use registry::ServerRegistry;
