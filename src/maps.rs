// /proc/<pid>/maps 解析，产出可 hook 的文件映射区间
use crate::log;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fs;


// start-end perms offset major:minor inode [path]
static MAPS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9a-fA-F]+)-([0-9a-fA-F]+)\s+(\S{4})\s+([0-9a-fA-F]+)\s+([0-9a-fA-F]+):([0-9a-fA-F]+)\s+([0-9]+)(.*)$",
    )
    .expect("maps line pattern is valid")
});

// maps 中的一行映射记录
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapInfo {
    pub start: usize,
    pub end: usize,
    // PROT_READ | PROT_WRITE | PROT_EXEC 组合
    pub perms: i32,
    pub is_private: bool,
    pub offset: usize,
    pub dev: u64,
    pub inode: u64,
    // 为空表示匿名映射
    pub path: String,
}

impl MapInfo {
    // 扫描当前进程的映射，仅保留可 hook 的区间
    pub fn scan() -> Vec<MapInfo> {
        scan_maps_file("/proc/self/maps")
    }

    pub fn scan_pid(pid: i32) -> Vec<MapInfo> {
        scan_maps_file(&format!("/proc/{pid}/maps"))
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn is_readable(&self) -> bool {
        self.perms & libc::PROT_READ != 0
    }

    pub fn is_executable(&self) -> bool {
        self.perms & libc::PROT_EXEC != 0
    }

    pub fn dev_major(&self) -> u32 {
        libc::major(self.dev as libc::dev_t) as u32
    }

    pub fn dev_minor(&self) -> u32 {
        libc::minor(self.dev as libc::dev_t) as u32
    }
}

impl fmt::Display for MapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let perm = |flag: i32, ch: char| if self.perms & flag != 0 { ch } else { '-' };
        write!(
            f,
            "{:08x}-{:08x} {}{}{}{} {:08x} {:02x}:{:02x} {} {}",
            self.start,
            self.end,
            perm(libc::PROT_READ, 'r'),
            perm(libc::PROT_WRITE, 'w'),
            perm(libc::PROT_EXEC, 'x'),
            if self.is_private { 'p' } else { 's' },
            self.offset,
            self.dev_major(),
            self.dev_minor(),
            self.inode,
            self.path
        )
    }
}

// 映射数据源，engine 通过它重新扫描；测试可替换为固定文本
pub trait MapsSource: Send + Sync {
    fn scan(&self) -> Vec<MapInfo>;
}

// 读取 /proc/<pid>/maps，pid 为 None 时读取 self
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcMaps {
    pub pid: Option<i32>,
}

impl MapsSource for ProcMaps {
    fn scan(&self) -> Vec<MapInfo> {
        match self.pid {
            Some(pid) => MapInfo::scan_pid(pid),
            None => MapInfo::scan(),
        }
    }
}

impl<F> MapsSource for F
where
    F: Fn() -> Vec<MapInfo> + Send + Sync,
{
    fn scan(&self) -> Vec<MapInfo> {
        self()
    }
}

// 文件无法读取时返回空列表，由调用方决定是否视为失败
fn scan_maps_file(path: &str) -> Vec<MapInfo> {
    match fs::read_to_string(path) {
        Ok(content) => parse_maps(&content),
        Err(err) => {
            log::warn(format_args!("read {path} failed: {err}"));
            Vec::new()
        }
    }
}

// 包含 addr 的映射，不经过 should_track 过滤，可执行段也会返回
pub fn find_mapping(addr: usize) -> Option<MapInfo> {
    let content = match fs::read_to_string("/proc/self/maps") {
        Ok(content) => content,
        Err(err) => {
            log::warn(format_args!("read /proc/self/maps failed: {err}"));
            return None;
        }
    };
    content
        .lines()
        .filter_map(parse_maps_line)
        .find(|info| info.contains(addr))
}

pub fn parse_maps(content: &str) -> Vec<MapInfo> {
    content
        .lines()
        .filter_map(parse_maps_line)
        .filter(should_track)
        .collect()
}

// 解析单行 maps 记录，字段数不符时返回 None
pub fn parse_maps_line(line: &str) -> Option<MapInfo> {
    let caps = MAPS_LINE.captures(line)?;
    let hex = |idx: usize| usize::from_str_radix(&caps[idx], 16).ok();

    let start = hex(1)?;
    let end = hex(2)?;
    let offset = hex(4)?;
    let major = u32::from_str_radix(&caps[5], 16).ok()?;
    let minor = u32::from_str_radix(&caps[6], 16).ok()?;
    let inode = caps[7].parse::<u64>().ok()?;

    let perm = caps[3].as_bytes();
    let mut perms = 0;
    if perm[0] == b'r' {
        perms |= libc::PROT_READ;
    }
    if perm[1] == b'w' {
        perms |= libc::PROT_WRITE;
    }
    if perm[2] == b'x' {
        perms |= libc::PROT_EXEC;
    }

    Some(MapInfo {
        start,
        end,
        perms,
        is_private: perm[3] == b'p',
        offset,
        dev: libc::makedev(major, minor) as u64,
        inode,
        path: caps[8].trim().to_string(),
    })
}

// 仅保留私有、不可执行、由真实文件支撑的映射
// 匿名映射和 [stack]/[heap]/[vdso] 之类的伪映射一律排除
pub fn should_track(info: &MapInfo) -> bool {
    info.is_private
        && !info.is_executable()
        && !info.path.is_empty()
        && !info.path.starts_with('[')
}
