mod common;

use std::rc::Rc;

use common::Person;
use ftui_bindgroup::{
    BindingId, EditGroup, FieldBinding, ItemRef, LiveBinding, ProposedValue, ProposedValueEntry,
    ProposedValueTable, Value,
};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Join(usize),
    Leave(usize),
    Edit(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..6).prop_map(Op::Join),
        (0usize..6).prop_map(Op::Leave),
        (0usize..6).prop_map(Op::Edit),
    ]
}

fn pending(item: &ItemRef, property: &str, raw: i64) -> ProposedValueEntry {
    ProposedValueEntry::new(
        ProposedValue {
            item: item.clone(),
            property: property.to_owned(),
            raw: Value::Int(raw),
            converted: Some(Value::Int(raw)),
        },
        BindingId::fresh(),
        Vec::new(),
    )
}

proptest! {
    #[test]
    fn snapshot_tracks_members(ops in prop::collection::vec(op(), 0..40)) {
        let people: Vec<_> = (0..3)
            .map(|i| Person::new(&[("A", Value::Int(i)), ("B", Value::Int(i))]))
            .collect();
        let bindings: Vec<Rc<FieldBinding>> = (0..6)
            .map(|i| Rc::new(FieldBinding::new(people[i % 3].item(), if i < 3 { "A" } else { "B" })))
            .collect();
        let group = EditGroup::new();

        for op in ops {
            match op {
                Op::Join(i) => group.join(bindings[i].clone()),
                Op::Leave(i) => group.leave(bindings[i].id()),
                Op::Edit(i) => bindings[i].set_target(Value::Int(100 + i as i64)),
            }
            let members = group.member_ids();
            let mut unique = members.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), members.len());
            prop_assert_eq!(group.snapshot_ids(), members);
        }
    }

    #[test]
    fn proposed_table_keeps_one_entry_per_key(
        adds in prop::collection::vec((0usize..3, 0usize..3, any::<i64>()), 0..30)
    ) {
        let people: Vec<ItemRef> = (0..3)
            .map(|_| Person::new(&[]).item())
            .collect();
        let properties = ["A", "B", "C"];
        let mut table = ProposedValueTable::new();
        let mut expected: Vec<((usize, usize), i64)> = Vec::new();

        for (item, property, raw) in adds {
            let replaced = table.add(pending(&people[item], properties[property], raw));
            let previous = expected.iter().position(|(key, _)| *key == (item, property));
            prop_assert_eq!(replaced.is_some(), previous.is_some());
            if let Some(idx) = previous {
                expected.remove(idx);
            }
            expected.push(((item, property), raw));
        }

        prop_assert_eq!(table.len(), expected.len());
        for ((item, property), raw) in expected {
            let entry = table.get(&people[item], properties[property]);
            prop_assert_eq!(entry.map(|e| e.raw().clone()), Some(Value::Int(raw)));
        }
    }
}
