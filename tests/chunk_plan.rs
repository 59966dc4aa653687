use paper_ingest::chunk_plan::{ChunkPlan, PARAGRAPH_SEPARATOR};

#[test]
fn chunk_plan_round_trips() {
    let texts = [
        "one",
        "a\n\nb\n\nc",
        "first paragraph\n\nsecond one\n\n\n\nafter a blank\n\nlast",
        "\n\nleading and trailing\n\n",
        "单行中文段落\n\n第二段",
    ];
    for text in texts {
        for max in [1, 3, 8, 20, 3000] {
            let plan = ChunkPlan::from_text(text, max);
            assert_eq!(plan.join(), text, "max {max}");
        }
    }
}

#[test]
fn chunk_plan_respects_budget() {
    let text = "aaaa\n\nbb\n\ncccccccccccc\n\nd\n\ne";
    let plan = ChunkPlan::from_text(text, 8);
    for (i, chunk) in plan.chunks.iter().enumerate() {
        if plan.is_oversized(i) {
            assert!(!chunk.contains(PARAGRAPH_SEPARATOR));
        } else {
            assert!(chunk.chars().count() <= 8);
        }
    }
    assert_eq!(plan.chunks, vec!["aaaa\n\nbb", "cccccccccccc", "d\n\ne"]);
    assert!(plan.is_oversized(1));
}

#[test]
fn chunk_plan_separator_counts_toward_budget() {
    assert_eq!(ChunkPlan::from_text("a\n\nb", 4).len(), 1);
    assert_eq!(ChunkPlan::from_text("a\n\nb", 3).len(), 2);
}

#[test]
fn chunk_plan_empty_text() {
    let plan = ChunkPlan::from_text("", 100);
    assert!(plan.is_empty());
    assert_eq!(plan.join(), "");
}
