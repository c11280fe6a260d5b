// 全局常量

/// 服务器记录字段限制
pub mod limits {
    pub const SERVER_NAME_MAX: usize = 100;
    pub const HOSTNAME_MAX: usize = 255;
    pub const USERNAME_MAX: usize = 100;
    pub const CONFIG_NAME_MAX: usize = 100;
    pub const CONFIG_PATH_MAX: usize = 500;
}

/// 默认值
pub mod defaults {
    /// SSH 默认端口
    pub const SSH_PORT: u16 = 22;
    /// 默认同步的远程配置文件
    pub const CONFIG_PATH: &str = "/etc/XrayR/config.yml";
    /// 连接超时（秒）
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    /// 配置拉取超时（秒）
    pub const FETCH_TIMEOUT_SECS: u64 = 30;
}

/// 远程命令约定
pub mod remote {
    /// 目标文件不存在时读取脚本的退出码（sysexits EX_NOINPUT）
    pub const MISSING_FILE_EXIT: i32 = 66;
    /// push 时先写入的临时文件后缀
    pub const PUSH_TEMP_SUFFIX: &str = ".shellmaster.tmp";
    /// 连接测试回显内容
    pub const PROBE_ECHO: &str = "shellmaster-connection-ok";
}

/// 环境变量
pub mod env {
    /// base64 编码的 32 字节主密钥
    pub const MASTER_KEY: &str = "SHELLMASTER_MASTER_KEY";
}
