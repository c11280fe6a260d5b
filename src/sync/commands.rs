// 同步引擎使用的远程命令

use crate::constants::remote;

/// 读取文件；文件不存在时以 MISSING_FILE_EXIT 退出
pub fn read_command(path: &str) -> String {
    let quoted = shell_words::quote(path);
    format!(
        "test -f {} || exit {}; cat -- {}",
        quoted,
        remote::MISSING_FILE_EXIT,
        quoted
    )
}

/// 文件存在时退出码为 0
pub fn exists_command(path: &str) -> String {
    format!("test -f {}", shell_words::quote(path))
}

/// 从 stdin 写入临时文件，再原子替换目标文件
pub fn write_command(path: &str) -> String {
    let temp = format!("{}{}", path, remote::PUSH_TEMP_SUFFIX);
    let temp = shell_words::quote(&temp);
    format!(
        "cat > {} && mv -f -- {} {}",
        temp,
        temp,
        shell_words::quote(path)
    )
}
