//! 分组规划：把点位集合切分成可一次读取的连续地址区间。
//!
//! 纯函数、确定性、幂等：同样的输入永远得到同样的分组。

use domain::{ConfigSnapshot, TagCategory, TagConfig, TagGroup};
use std::collections::BTreeMap;

/// 按快照规划分组（端点无法解析的点位被跳过，校验阶段已拒绝此类快照）。
pub fn plan(snapshot: &ConfigSnapshot) -> Vec<TagGroup> {
    let entries = snapshot
        .tags
        .iter()
        .filter_map(|tag| snapshot.endpoint_for(tag).map(|ep| (ep.key(), tag)))
        .collect::<Vec<_>>();
    plan_entries(&entries)
}

/// 按 `(端点, 类别, 刷新周期)` 分区，区内按地址排序后贪心合并。
///
/// 先把互相重叠的点位聚成不可拆分的簇，再把首尾相接的簇并入同一组，
/// 组跨度不超过协议单次请求上限；同类别的组之间不会重叠。
pub fn plan_entries(entries: &[(String, &TagConfig)]) -> Vec<TagGroup> {
    let mut partitions: BTreeMap<(&str, TagCategory, u64), Vec<&TagConfig>> = BTreeMap::new();
    for (endpoint_key, tag) in entries {
        partitions
            .entry((endpoint_key.as_str(), tag.category, tag.refresh_rate_ms))
            .or_default()
            .push(tag);
    }

    let mut groups = Vec::new();
    for ((endpoint_key, category, refresh_rate_ms), mut tags) in partitions {
        // 稳定排序：同地址保持输入顺序
        tags.sort_by_key(|tag| tag.address);
        let max_span = category.max_span() as u32;

        let mut current: Option<TagGroup> = None;
        for cluster in overlap_clusters(&tags) {
            if let Some(group) = current.as_mut() {
                let start = group.start_address as u32;
                if cluster.start == group.end_address() && cluster.end - start <= max_span {
                    group.length = (cluster.end - start) as u16;
                    group.member_tag_ids.extend(cluster.members);
                    continue;
                }
            }
            if let Some(done) = current.take() {
                groups.push(done);
            }
            current = Some(TagGroup {
                endpoint_key: endpoint_key.to_string(),
                category,
                start_address: cluster.start as u16,
                length: (cluster.end - cluster.start) as u16,
                refresh_rate_ms,
                member_tag_ids: cluster.members,
            });
        }
        if let Some(done) = current {
            groups.push(done);
        }
    }
    groups
}

/// 地址区间互相重叠的一串点位，`[start, end)`。
struct Cluster {
    start: u32,
    end: u32,
    members: Vec<String>,
}

/// `tags` 已按地址排序。
fn overlap_clusters(tags: &[&TagConfig]) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    for tag in tags {
        match clusters.last_mut() {
            Some(cluster) if (tag.address as u32) < cluster.end => {
                cluster.end = cluster.end.max(tag.end_address());
                cluster.members.push(tag.id.clone());
            }
            _ => clusters.push(Cluster {
                start: tag.address as u32,
                end: tag.end_address(),
                members: vec![tag.id.clone()],
            }),
        }
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TagDataType;

    fn tag(id: &str, category: TagCategory, address: u16, length: u16, refresh: u64) -> TagConfig {
        TagConfig {
            id: id.to_string(),
            name: id.to_string(),
            plc_id: None,
            category,
            address,
            length,
            refresh_rate_ms: refresh,
            scale: 1.0,
            unit: None,
            min: None,
            max: None,
            data_type: TagDataType::Uint16,
        }
    }

    fn run(tags: &[TagConfig]) -> Vec<TagGroup> {
        let entries: Vec<_> = tags.iter().map(|t| ("plc:502".to_string(), t)).collect();
        plan_entries(&entries)
    }

    #[test]
    fn contiguous_registers_merge_and_gap_splits() {
        let tags = vec![
            tag("r0", TagCategory::Register, 0, 1, 100),
            tag("r1", TagCategory::Register, 1, 1, 100),
            tag("r2", TagCategory::Register, 2, 1, 100),
            tag("r10", TagCategory::Register, 10, 1, 100),
        ];
        let groups = run(&tags);
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].start_address, groups[0].length), (0, 3));
        assert_eq!(groups[0].member_tag_ids, vec!["r0", "r1", "r2"]);
        assert_eq!((groups[1].start_address, groups[1].length), (10, 1));
    }

    #[test]
    fn partitions_by_category_and_refresh() {
        let tags = vec![
            tag("di0", TagCategory::DigitalInput, 0, 1, 100),
            tag("do0", TagCategory::DigitalOutput, 0, 1, 100),
            tag("di1-slow", TagCategory::DigitalInput, 1, 1, 1000),
        ];
        let groups = run(&tags);
        assert_eq!(groups.len(), 3);
        for group in &groups {
            assert_eq!(group.member_tag_ids.len(), 1);
        }
    }

    #[test]
    fn unsorted_input_with_multiword_tags() {
        let tags = vec![
            tag("f4", TagCategory::Register, 4, 2, 100),
            tag("f0", TagCategory::Register, 0, 2, 100),
            tag("f2", TagCategory::Register, 2, 2, 100),
            tag("dup", TagCategory::Register, 0, 1, 100),
        ];
        let groups = run(&tags);
        assert_eq!(groups.len(), 1);
        assert_eq!((groups[0].start_address, groups[0].length), (0, 6));
        assert_eq!(groups[0].member_tag_ids, vec!["f0", "dup", "f2", "f4"]);
    }

    #[test]
    fn span_limit_starts_new_group() {
        let tags: Vec<_> = (0..130)
            .map(|i| tag(&format!("r{i}"), TagCategory::Register, i, 1, 100))
            .collect();
        let groups = run(&tags);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].length, 125);
        assert_eq!((groups[1].start_address, groups[1].length), (125, 5));
    }

    #[test]
    fn overlapping_tag_at_span_limit_moves_with_its_neighbour() {
        let mut tags: Vec<_> = (0..125)
            .map(|i| tag(&format!("r{i}"), TagCategory::Register, i, 1, 100))
            .collect();
        tags.push(tag("f124", TagCategory::Register, 124, 2, 100));
        let groups = run(&tags);
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].start_address, groups[0].length), (0, 124));
        assert_eq!((groups[1].start_address, groups[1].length), (124, 2));
        assert_eq!(groups[1].member_tag_ids, vec!["r124", "f124"]);
        assert_disjoint_cover(&tags, &groups);
    }

    #[test]
    fn generated_layouts_never_overlap() {
        // 伪随机布局：地址、长度、周期混合，含大量重叠
        let mut state = 0x2545_f491_u32;
        let mut next = move |bound: u32| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state % bound
        };
        for round in 0..50 {
            let tags: Vec<_> = (0..60)
                .map(|i| {
                    let refresh = if next(2) == 0 { 100 } else { 500 };
                    tag(
                        &format!("t{round}-{i}"),
                        TagCategory::Register,
                        next(400) as u16,
                        1 + next(4) as u16,
                        refresh,
                    )
                })
                .collect();
            let groups = run(&tags);
            assert_disjoint_cover(&tags, &groups);
        }
    }

    /// 每个点位恰好在一个组内且被组区间覆盖，同周期同类别的组互不重叠，跨度不超限。
    fn assert_disjoint_cover(tags: &[TagConfig], groups: &[TagGroup]) {
        for tag in tags {
            let owners: Vec<_> = groups
                .iter()
                .filter(|g| g.member_tag_ids.contains(&tag.id))
                .collect();
            assert_eq!(owners.len(), 1, "tag {} owned by {} groups", tag.id, owners.len());
            let group = owners[0];
            assert!(group.start_address <= tag.address);
            assert!(tag.end_address() <= group.end_address());
        }
        for (i, a) in groups.iter().enumerate() {
            assert!(a.length <= a.category.max_span());
            for b in &groups[i + 1..] {
                if a.category == b.category && a.refresh_rate_ms == b.refresh_rate_ms {
                    let disjoint = a.end_address() <= b.start_address as u32
                        || b.end_address() <= a.start_address as u32;
                    assert!(disjoint, "groups {:?} and {:?} overlap", a, b);
                }
            }
        }
    }

    #[test]
    fn plan_is_idempotent() {
        let tags = vec![
            tag("a", TagCategory::AnalogInput, 7, 1, 250),
            tag("b", TagCategory::AnalogInput, 8, 1, 250),
            tag("c", TagCategory::Register, 40, 2, 500),
        ];
        assert_eq!(run(&tags), run(&tags));
    }
}
