// DT_HASH 与 DT_GNU_HASH 使用的符号名哈希

// SysV ELF hash
pub(super) fn elf_hash(name: &[u8]) -> u32 {
    name.iter().fold(0u32, |h, &ch| {
        let h = (h << 4).wrapping_add(ch as u32);
        let g = h & 0xf000_0000;
        (h ^ g) ^ (g >> 24)
    })
}

// GNU hash (djb2 变体：h * 33 + c)
pub(super) fn elf_gnu_hash(name: &[u8]) -> u32 {
    name.iter()
        .fold(5381u32, |h, &ch| h.wrapping_mul(33).wrapping_add(ch as u32))
}

#[cfg(test)]
mod tests {
    use super::{elf_gnu_hash, elf_hash};

    #[test]
    fn sysv_hash_known_values() {
        assert_eq!(elf_hash(b""), 0);
        assert_eq!(elf_hash(b"printf"), 0x0779_05a6);
        assert_eq!(elf_hash(b"fopen"), 0x006d_66be);
    }

    #[test]
    fn gnu_hash_known_values() {
        assert_eq!(elf_gnu_hash(b""), 5381);
        assert_eq!(elf_gnu_hash(b"printf"), 0x156b_2bb8);
        assert_eq!(elf_gnu_hash(b"puts"), 0x7c9c_7b11);
    }
}
