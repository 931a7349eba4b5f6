use std::io::Write;

use ttyvid::subtitle::SubtitleTrack;

const TWO_CUES: &str = "\u{feff}1\r\n\
00:00:01,000 --> 00:00:02,500\r\n\
<i>Hello</i>\r\n\
\r\n\
2\r\n\
00:00:04,000 --> 00:00:05,000\r\n\
World\r\n\
line two\r\n";

fn load(contents: &str) -> SubtitleTrack {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write srt");
    SubtitleTrack::load(file.path()).expect("load srt")
}

#[test]
fn cue_bounds_are_inclusive() {
    let track = load(TWO_CUES);
    assert_eq!(track.len(), 2);

    assert_eq!(track.find_active_cue(0.999), None);
    assert_eq!(
        track.find_active_cue(1.0).map(|cue| cue.text.as_str()),
        Some("Hello")
    );
    assert_eq!(
        track.find_active_cue(2.5).map(|cue| cue.index),
        Some(1)
    );
    assert_eq!(track.find_active_cue(3.0), None);
    assert_eq!(
        track.find_active_cue(5.0).map(|cue| cue.text.as_str()),
        Some("World\nline two")
    );
    assert_eq!(track.find_active_cue(5.001), None);
}

#[test]
fn broken_blocks_do_not_hide_good_ones() {
    let track = load(
        "1\n00:00:03,000 --> 00:00:04,000\nLater\n\n\
         oops\nno timing here\n\n\
         3\n00:00:09,000 --> 00:00:08,000\nBackwards\n\n\
         4\n00:00:00,500 --> 00:00:01,000\nEarlier\n",
    );
    let starts: Vec<f64> = track.cues().iter().map(|cue| cue.start).collect();
    assert_eq!(starts, vec![0.5, 3.0]);
    assert_eq!(track.cues()[0].text, "Earlier");
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let error = SubtitleTrack::load(&dir.path().join("absent.srt")).unwrap_err();
    assert_eq!(error.code(), "IO");
}
