// 符号名到符号索引的查找，通过 include! 嵌入 elf.rs

impl ElfTables {
    // 根据 hash 类型分派到对应查找算法
    unsafe fn find_symidx(&self, symbol: &str) -> Option<u32> {
        if self.is_use_gnu_hash {
            match self.gnu_hash_lookup_def(symbol) {
                Some(symidx) => Some(symidx),
                None => self.gnu_hash_lookup_undef(symbol),
            }
        } else {
            self.elf_hash_lookup(symbol)
        }
    }

    // DT_HASH：bucket 定位后沿 chain 链表比较名称
    unsafe fn elf_hash_lookup(&self, symbol: &str) -> Option<u32> {
        if self.bucket_cnt == 0 {
            return None;
        }
        let hash = elf_hash(symbol.as_bytes());
        let mut i = *self.bucket.add((hash % self.bucket_cnt) as usize);
        while i != 0 {
            if self.sym_name(i) == Some(symbol) {
                return Some(i);
            }
            i = *self.chain.add(i as usize);
        }
        None
    }

    // DT_GNU_HASH 已定义符号：bloom filter 排除 -> bucket 定位 -> chain 遍历
    unsafe fn gnu_hash_lookup_def(&self, symbol: &str) -> Option<u32> {
        if self.bucket_cnt == 0 || self.bloom_sz == 0 {
            return None;
        }
        let hash = elf_gnu_hash(symbol.as_bytes());
        let word_bits = mem::size_of::<ElfAddr>() * 8;
        let word = *self
            .bloom
            .add((hash as usize / word_bits) % self.bloom_sz as usize);
        let mask = (1usize << (hash as usize % word_bits))
            | (1usize << ((hash >> self.bloom_shift) as usize % word_bits));
        if word & mask != mask {
            return None;
        }

        let mut i = *self.bucket.add((hash % self.bucket_cnt) as usize);
        if i < self.symoffset {
            return None;
        }

        // chain 最低位为 1 表示链尾
        loop {
            let symhash = *self.chain.add((i - self.symoffset) as usize);
            if (hash | 1) == (symhash | 1) && self.sym_name(i) == Some(symbol) {
                return Some(i);
            }
            if symhash & 1 != 0 {
                return None;
            }
            i += 1;
        }
    }

    // GNU hash 不索引 symoffset 之前的符号（多为导入符号），只能线性扫描
    unsafe fn gnu_hash_lookup_undef(&self, symbol: &str) -> Option<u32> {
        for i in 0..self.symoffset {
            if self.sym_name(i) == Some(symbol) {
                return Some(i);
            }
        }
        None
    }

    unsafe fn sym_name(&self, idx: u32) -> Option<&str> {
        let sym = &*self.symtab.add(idx as usize);
        CStr::from_ptr(self.strtab.add(sym.st_name as usize))
            .to_str()
            .ok()
    }
}
