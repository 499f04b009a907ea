//! 按键比较两个序列，得到仅左、仅右、共有三部分

use std::collections::HashMap;
use std::hash::Hash;

/// 比较结果
#[derive(Debug)]
pub struct KeyedDiff<L, R> {
    /// 只在左侧出现（保持左侧顺序）
    pub only_left: Vec<L>,
    /// 只在右侧出现（保持右侧顺序）
    pub only_right: Vec<R>,
    /// 两侧都有，按左侧顺序配对
    pub both: Vec<(L, R)>,
}

impl<L, R> KeyedDiff<L, R> {
    pub fn is_identical(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty()
    }
}

/// 按键函数对两个序列做集合差和交集
///
/// 右侧出现重复键时只有第一个参与配对，其余归入 `only_right`；
/// 左侧重复键同理归入 `only_left`。
pub fn keyed_diff<L, R, K, FL, FR>(
    left: Vec<L>,
    right: Vec<R>,
    left_key: FL,
    right_key: FR,
) -> KeyedDiff<L, R>
where
    K: Eq + Hash,
    FL: Fn(&L) -> K,
    FR: Fn(&R) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::with_capacity(right.len());
    for (i, item) in right.iter().enumerate() {
        index.entry(right_key(item)).or_insert(i);
    }

    let mut slots: Vec<Option<R>> = right.into_iter().map(Some).collect();
    let mut only_left = Vec::new();
    let mut both = Vec::new();

    for item in left {
        let matched = index
            .remove(&left_key(&item))
            .and_then(|i| slots[i].take());
        match matched {
            Some(r) => both.push((item, r)),
            None => only_left.push(item),
        }
    }

    KeyedDiff {
        only_left,
        only_right: slots.into_iter().flatten().collect(),
        both,
    }
}

/// 名称比较键；大小写不敏感时统一转小写
pub fn name_key(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}
