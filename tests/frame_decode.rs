use futures::StreamExt;
use futures::stream;
use paper_ingest::error::{IngestError, Result};
use paper_ingest::frame::{FrameDecoder, ProgressFrame, decode_frames};
use paper_ingest::types::AnalysisStatus;

fn statuses(frames: &[ProgressFrame]) -> Vec<AnalysisStatus> {
    frames.iter().map(|f| f.status).collect()
}

#[test]
fn reassembles_frames_split_across_reads() {
    let raw = "data: {\"status\":\"parsing\",\"progress\":12.6,\"message\":\"解析中\"}\n\n\
               data: {\"status\":\"extracting\",\"progress\":50}\n\n";
    let bytes = raw.as_bytes();

    for stride in [1, 2, 3, 5, 17, bytes.len()] {
        let mut dec = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(stride) {
            frames.extend(dec.push(chunk));
        }
        assert_eq!(
            statuses(&frames),
            vec![AnalysisStatus::Parsing, AnalysisStatus::Extracting],
            "stride {stride}"
        );
        assert_eq!(frames[0].percent(), 13);
        assert_eq!(frames[0].message(), "解析中");
        assert_eq!(dec.skipped(), 0);
    }
}

#[test]
fn skips_malformed_and_unmarked_lines() {
    let mut dec = FrameDecoder::new();
    let frames = dec.push(
        b": keep-alive\n\
          event: progress\n\
          data: {\"status\":\"parsing\",\"progress\":10}\n\
          data: {broken\n\
          data:\n\
          data: {\"status\":\"complete\",\"progress\":100}\n",
    );
    assert_eq!(
        statuses(&frames),
        vec![AnalysisStatus::Parsing, AnalysisStatus::Complete]
    );
    assert_eq!(dec.skipped(), 1);
}

#[test]
fn accepts_crlf_and_missing_space_after_marker() {
    let mut dec = FrameDecoder::new();
    let frames = dec.push(b"data:{\"status\":\"uploading\",\"progress\":5}\r\n\r\n");
    assert_eq!(statuses(&frames), vec![AnalysisStatus::Uploading]);
}

#[test]
fn finish_decodes_trailing_frame_without_newline() {
    let mut dec = FrameDecoder::new();
    assert!(dec.push(b"data: {\"status\":\"complete\"").is_empty());
    assert!(dec.push(b",\"progress\":100}").is_empty());

    let last = dec.finish().unwrap();
    assert_eq!(last.status, AnalysisStatus::Complete);
    assert!(dec.finish().is_none());
}

#[test]
fn percent_is_clamped() {
    let frame = |progress: f64| ProgressFrame {
        status: AnalysisStatus::Parsing,
        progress,
        message: None,
        data: None,
    };
    assert_eq!(frame(-3.0).percent(), 0);
    assert_eq!(frame(140.0).percent(), 100);
    assert_eq!(frame(f64::NAN).percent(), 0);
}

#[test]
fn complete_frame_carries_result() {
    let mut dec = FrameDecoder::new();
    let frames = dec.push(
        br##"data: {"status":"complete","progress":100,"data":{"originalText":"# Title","translatedText":null,"charts":null,"paperAnalysis":{"summary":{"tldr":"t"},"paperText":"p"}}}
"##,
    );
    let data = frames[0].data.as_ref().unwrap();
    assert_eq!(data.original_text, "# Title");
    assert!(data.translated_text.is_empty());
    assert!(data.images.is_empty());
    assert_eq!(data.paper_analysis.as_ref().unwrap().paper_text, "p");
}

#[tokio::test]
async fn stream_yields_frames_then_transport_error() {
    let body = stream::iter(vec![
        Ok(b"data: {\"status\":\"parsing\",\"progress\":10}\n\ndata: {\"stat".to_vec()),
        Ok(b"us\":\"analyzing\",\"progress\":70}\n\n".to_vec()),
        Err(IngestError::Transport("connection reset".into())),
        Ok(b"data: {\"status\":\"complete\",\"progress\":100}\n\n".to_vec()),
    ]);

    let out: Vec<Result<ProgressFrame>> = decode_frames(body).collect().await;
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].as_ref().unwrap().status, AnalysisStatus::Parsing);
    assert_eq!(out[1].as_ref().unwrap().status, AnalysisStatus::Analyzing);
    assert!(matches!(out[2], Err(IngestError::Transport(_))));
}

#[tokio::test]
async fn stream_flushes_unterminated_last_frame() {
    let body = stream::iter(vec![Ok::<_, IngestError>(
        b"data: {\"status\":\"complete\",\"progress\":100}".to_vec(),
    )]);
    let out: Vec<Result<ProgressFrame>> = decode_frames(body).collect().await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_ref().unwrap().status, AnalysisStatus::Complete);
}

#[test]
fn odd_chart_records_do_not_drop_the_result() {
    let mut dec = FrameDecoder::new();
    let frames = dec.push(
        br##"data: {"status":"complete","progress":100,"data":{"originalText":"body","charts":[{"type":"table","pageNumber":3.0},{"id":"c2","pageNumber":-1},{"id":"c3","pageNumber":"7"},{"id":null,"pageNumber":null}]}}
"##,
    );
    assert_eq!(dec.skipped(), 0);

    let data = frames[0].data.as_ref().unwrap();
    assert_eq!(data.original_text, "body");
    let pages: Vec<u32> = data.images.iter().map(|i| i.page_number).collect();
    assert_eq!(pages, vec![3, 0, 7, 0]);
    assert!(data.images[0].id.is_empty());
    assert_eq!(data.images[1].id, "c2");
}
