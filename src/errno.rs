// 内部错误码，0 表示成功；对外接口只暴露 bool，错误码用于日志与测试
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Errno {
    Ok = 0,           // 成功
    InvalidArg = 1,   // 参数无效
    NoRegion = 2,     // 地址不在任何已跟踪的映射内
    Mmap = 3,         // mmap 预留或重建失败
    Mremap = 4,       // mremap 搬移页面失败
    RemapMoved = 5,   // mremap 返回地址与目标地址不一致
    Mprotect = 6,     // 修改页面保护属性失败
    Format = 7,       // ELF 或 packed relocation 格式错误
    RestoreLost = 8,  // 备份搬回失败，原映射无法恢复
}

impl Errno {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> Self {
        value as i32
    }
}
