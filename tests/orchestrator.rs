//! Orchestrator integration tests
//!
//! Drives the state machine with mock collaborators on a paused clock

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use beacon_sight::{
    AnalysisResult, BackendId, Error, Event, InteractionState, NarrationMode, Phrases, Prompts,
    Settings,
};

mod common;
use common::{AudioEvent, Harness, MemoryPrefs};

use InteractionState::{AwaitingCommand, Executing, Idle, Listening, ManualAnalysis};

fn phrases() -> Phrases {
    Phrases::default()
}

fn urgent(text: &str) -> AnalysisResult {
    AnalysisResult {
        text: text.to_string(),
        urgent: true,
    }
}

fn calm(text: &str) -> AnalysisResult {
    AnalysisResult {
        text: text.to_string(),
        urgent: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_narration_spoken_once() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.assert_scheduler_invariant();

    h.tick().await;

    assert_eq!(h.spoken(), vec!["前方OK"]);
    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.capture.calls(), 1);
    assert!(h.orchestrator.pipeline().latest_snapshot().is_some());
    h.assert_scheduler_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_narration_repeats_every_interval() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.tick().await;
    h.tick().await;
    h.tick().await;

    assert_eq!(h.spoken().len(), 3);
    let (prompt, backend) = h.analyzer.calls()[0].clone();
    assert_eq!(prompt, Prompts::default().short);
    assert_eq!(backend, BackendId::Gemini);
}

#[tokio::test(start_paused = true)]
async fn test_help_command_flow() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.orchestrator.request_listen().await.unwrap();
    assert_eq!(h.orchestrator.state(), Listening);
    assert!(h.orchestrator.recognizer_active());
    assert!(!h.orchestrator.scheduler_active());

    h.recognizer.hear("ヘルプ").await;
    h.settle().await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(
        h.orchestrator.history(),
        vec![Idle, AwaitingCommand, Listening, Executing, Idle]
    );
    assert_eq!(h.spoken(), vec![phrases().listen_prompt, phrases().help]);
    h.assert_scheduler_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_prompt_spoken_before_listening() {
    let mut h = Harness::new();
    h.orchestrator.request_listen().await.unwrap();

    assert_eq!(
        h.audio(),
        vec![
            AudioEvent::Speak(phrases().listen_prompt),
            AudioEvent::ListenStart(1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_listen_rejected_outside_idle() {
    let mut h = Harness::new();
    h.orchestrator.request_listen().await.unwrap();

    let err = h.orchestrator.request_listen().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            state: Listening,
            ..
        }
    ));
    assert_eq!(h.recognizer.sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_results_are_ignored() {
    let mut h = Harness::new();
    h.orchestrator.request_listen().await.unwrap();

    h.recognizer.last_sink().partial("ヘル").await;
    h.settle().await;

    assert_eq!(h.orchestrator.state(), Listening);
    assert_eq!(h.spoken().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_urgent_result_preempts_listening() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.orchestrator.request_listen().await.unwrap();
    let stale_sink = h.recognizer.last_sink();

    let epoch = 0;
    h.orchestrator
        .dispatch(Event::NarrationFinished {
            mode: NarrationMode::Automatic,
            epoch,
            result: Some(urgent("前方に段差があります")),
        })
        .await;

    assert_eq!(h.orchestrator.state(), Listening);
    assert!(h.orchestrator.recognizer_active());
    assert_eq!(
        h.audio(),
        vec![
            AudioEvent::Speak(phrases().listen_prompt),
            AudioEvent::ListenStart(1),
            AudioEvent::ListenStop,
            AudioEvent::Speak("緊急: 前方に段差があります".to_string()),
            AudioEvent::ListenStart(3),
        ]
    );

    // The stopped session's late result must not run a command
    stale_sink.final_text("ヘルプ").await;
    h.settle().await;
    assert_eq!(h.orchestrator.state(), Listening);

    h.recognizer.hear("ヘルプ").await;
    h.settle().await;
    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.spoken().last(), Some(&phrases().help));
}

#[tokio::test(start_paused = true)]
async fn test_speech_and_recognizer_never_overlap() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.orchestrator.request_listen().await.unwrap();
    h.orchestrator
        .dispatch(Event::NarrationFinished {
            mode: NarrationMode::Automatic,
            epoch: 0,
            result: Some(urgent("危険です")),
        })
        .await;
    h.recognizer.hear("詳しく").await;
    h.settle().await;

    let mut listening = false;
    for event in h.audio() {
        match event {
            AudioEvent::ListenStart(_) => listening = true,
            AudioEvent::ListenStop | AudioEvent::Heard(_) => listening = false,
            AudioEvent::Speak(text) => assert!(!listening, "spoke while listening: {text}"),
            AudioEvent::SpeechStopped => {}
        }
    }
    assert_eq!(h.orchestrator.state(), Idle);
}

#[tokio::test(start_paused = true)]
async fn test_non_urgent_result_discarded_while_busy() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.orchestrator.request_listen().await.unwrap();

    let epoch = 1;
    h.orchestrator
        .dispatch(Event::NarrationFinished {
            mode: NarrationMode::Automatic,
            epoch,
            result: Some(calm("前方OK")),
        })
        .await;

    assert_eq!(h.spoken(), vec![phrases().listen_prompt]);
    assert_eq!(h.orchestrator.state(), Listening);
}

#[tokio::test(start_paused = true)]
async fn test_stale_epoch_result_discarded() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.orchestrator
        .dispatch(Event::NarrationFinished {
            mode: NarrationMode::Automatic,
            epoch: 0,
            result: Some(calm("古い説明")),
        })
        .await;
    h.settle().await;

    assert!(h.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_capture_failures_suppress_narration() {
    let mut h = Harness::new();
    h.capture.set_failing(true);
    h.orchestrator.start();

    h.tick().await;
    h.tick().await;
    assert!(!h.orchestrator.is_suppressed());
    assert_eq!(h.orchestrator.failures().consecutive_failures(), 2);

    h.tick().await;
    assert!(h.orchestrator.is_suppressed());
    assert!(!h.orchestrator.scheduler_active());
    assert_eq!(h.orchestrator.state(), Idle);
    h.assert_scheduler_invariant();

    // Nothing more is attempted and nothing was spoken
    h.tick().await;
    h.tick().await;
    assert_eq!(h.capture.calls(), 3);
    assert!(h.spoken().is_empty());

    h.capture.set_failing(false);
    h.orchestrator.resume();
    assert!(h.orchestrator.scheduler_active());
    h.tick().await;
    assert_eq!(h.spoken(), vec!["前方OK"]);
    assert_eq!(h.orchestrator.failures().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.capture.set_failing(true);
    h.tick().await;
    h.tick().await;
    h.capture.set_failing(false);
    h.tick().await;
    h.capture.set_failing(true);
    h.tick().await;
    h.tick().await;

    assert!(!h.orchestrator.is_suppressed());
    assert_eq!(h.orchestrator.failures().consecutive_failures(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_analyzer_failure_is_silent() {
    let mut h = Harness::new();
    h.analyzer
        .push_reply(Err(Error::Backend("quota exceeded".to_string())));
    h.orchestrator.start();

    h.tick().await;
    assert!(h.spoken().is_empty());
    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.orchestrator.failures().consecutive_failures(), 1);

    h.tick().await;
    assert_eq!(h.spoken(), vec!["前方OK"]);
    assert_eq!(h.orchestrator.failures().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_analyzer_failures_suppress_narration() {
    let mut h = Harness::new();
    for _ in 0..3 {
        h.analyzer.push_reply(Err(Error::Backend("quota exceeded".to_string())));
    }
    h.orchestrator.start();

    h.tick().await;
    h.tick().await;
    assert!(!h.orchestrator.is_suppressed());
    assert_eq!(h.orchestrator.failures().consecutive_failures(), 2);

    h.tick().await;
    assert!(h.orchestrator.is_suppressed());
    assert!(!h.orchestrator.scheduler_active());
    h.assert_scheduler_invariant();

    h.tick().await;
    assert_eq!(h.capture.calls(), 3);
    assert!(h.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_narration_never_overlaps_listening() {
    let mut h = Harness::new();
    h.speech.set_duration(Duration::from_secs(8));
    h.orchestrator.start();

    // The second tick lands while the first narration is still playing
    h.tick().await;
    assert_eq!(h.speech.sounding(), 1);
    h.tick().await;
    assert_eq!(h.analyzer.calls().len(), 1);
    assert_eq!(h.spoken(), vec!["前方OK"]);

    h.tick().await;
    assert_eq!(h.analyzer.calls().len(), 2);
    assert_eq!(h.speech.sounding(), 1);

    h.clear_audio();
    h.orchestrator.request_listen().await.unwrap();

    assert_eq!(h.recognizer.overlaps(), 0);
    assert_eq!(
        h.audio(),
        vec![
            AudioEvent::SpeechStopped,
            AudioEvent::Speak(phrases().listen_prompt),
            AudioEvent::ListenStart(1),
        ]
    );
    h.assert_scheduler_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_random_interleavings_keep_invariants() {
    const TRANSCRIPTS: [&str; 8] = [
        "",
        "あ",
        "ヘルプ",
        "とまれ",
        "詳しく",
        "再開",
        "クロード",
        "今日の天気は",
    ];

    for seed in 0..12_u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut h = Harness::new();
        if seed % 2 == 1 {
            h.speech.set_duration(Duration::from_millis(rng.gen_range(500..9_000)));
        }
        h.orchestrator.start();

        for _ in 0..60 {
            match rng.gen_range(0..9) {
                0 | 1 => h.tick().await,
                2 => {
                    h.orchestrator.dispatch(Event::ListenRequested).await;
                }
                3 => {
                    h.orchestrator.dispatch(Event::ManualAnalysisRequested).await;
                }
                4 => {
                    h.orchestrator.dispatch(Event::ResumeRequested).await;
                }
                5 if h.recognizer.sessions() > 0 => {
                    let text = TRANSCRIPTS[rng.gen_range(0..TRANSCRIPTS.len())];
                    h.recognizer.hear(text).await;
                }
                6 if h.recognizer.sessions() > 0 => {
                    h.recognizer.last_sink().error("network down").await;
                }
                7 => {
                    let mode = match rng.gen_range(0..3) {
                        0 => NarrationMode::Automatic,
                        1 => NarrationMode::Manual,
                        _ => NarrationMode::Detailed,
                    };
                    let result = if rng.gen_bool(0.5) {
                        urgent("危険です")
                    } else {
                        calm("前方OK")
                    };
                    h.orchestrator
                        .dispatch(Event::NarrationFinished {
                            mode,
                            epoch: rng.gen_range(0..4),
                            result: Some(result),
                        })
                        .await;
                }
                8 => h.capture.set_failing(rng.gen_bool(0.3)),
                _ => h.analyzer.push_reply(Ok("前方に段差があります".to_string())),
            }

            h.settle().await;
            h.assert_scheduler_invariant();
            h.assert_history_follows_table();
            assert_eq!(h.recognizer.overlaps(), 0, "seed {seed}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_resume_command_clears_suppression() {
    let mut h = Harness::new();
    h.capture.set_failing(true);
    h.orchestrator.start();
    for _ in 0..3 {
        h.tick().await;
    }
    assert!(h.orchestrator.is_suppressed());

    h.command("再開").await;

    assert!(!h.orchestrator.is_suppressed());
    assert!(h.orchestrator.scheduler_active());
    assert_eq!(h.spoken().last(), Some(&phrases().resumed));
}

#[tokio::test(start_paused = true)]
async fn test_other_commands_keep_failure_suppression() {
    let mut h = Harness::new();
    h.capture.set_failing(true);
    h.orchestrator.start();
    for _ in 0..3 {
        h.tick().await;
    }

    h.command("ヘルプ").await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert!(h.orchestrator.is_suppressed());
    h.assert_scheduler_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_stop_pauses_until_reengaged() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.command("とまれ").await;
    assert_eq!(h.orchestrator.state(), Idle);
    assert!(h.orchestrator.is_paused());
    assert!(!h.orchestrator.scheduler_active());
    assert_eq!(h.spoken().last(), Some(&phrases().stopped));
    h.assert_scheduler_invariant();

    h.clear_audio();
    h.tick().await;
    assert!(h.spoken().is_empty());

    h.command("ヘルプ").await;
    assert!(!h.orchestrator.is_paused());
    assert!(h.orchestrator.scheduler_active());
}

#[tokio::test(start_paused = true)]
async fn test_stop_outranks_backend_name() {
    let mut h = Harness::new();
    h.command("とまれ ジェミニ").await;

    assert!(h.orchestrator.is_paused());
    assert_eq!(h.prefs.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backend_switch_is_persisted() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.command("クロードに切り替えて").await;

    assert_eq!(h.orchestrator.backend(), BackendId::Claude);
    assert_eq!(h.prefs.writes(), 1);
    assert_eq!(h.spoken().last().unwrap(), "クロードに切り替えました");

    h.tick().await;
    let (_, backend) = h.analyzer.calls().last().cloned().unwrap();
    assert_eq!(backend, BackendId::Claude);
}

#[tokio::test(start_paused = true)]
async fn test_persisted_backend_used_at_startup() {
    let h = Harness::with(Settings::default(), MemoryPrefs::with_backend(BackendId::OpenAi));
    assert_eq!(h.orchestrator.backend(), BackendId::OpenAi);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_apologizes() {
    let mut h = Harness::new();
    h.command("今日の天気は").await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.spoken().last(), Some(&phrases().unknown));
}

#[tokio::test(start_paused = true)]
async fn test_describe_in_detail() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.analyzer.set_default("右手にコンビニ、正面は横断歩道です");

    h.orchestrator.request_listen().await.unwrap();
    h.recognizer.hear("詳しく教えて").await;
    h.settle().await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(
        h.spoken().last().unwrap(),
        "右手にコンビニ、正面は横断歩道です"
    );
    let (prompt, _) = h.analyzer.calls().last().cloned().unwrap();
    assert_eq!(prompt, Prompts::default().detailed);
    assert!(h.orchestrator.history().contains(&Executing));
    h.assert_scheduler_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_detailed_capture_failure_returns_to_idle() {
    let mut h = Harness::new();
    h.capture.set_failing(true);

    h.command("詳しく").await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.spoken(), vec![phrases().listen_prompt]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_transcript_relistens_then_gives_up() {
    let mut h = Harness::new();
    h.orchestrator.request_listen().await.unwrap();

    h.recognizer.hear("").await;
    h.settle().await;
    assert_eq!(h.orchestrator.state(), Listening);
    assert_eq!(h.recognizer.sessions(), 2);

    h.recognizer.hear("あ").await;
    h.settle().await;
    assert_eq!(h.orchestrator.state(), Listening);
    assert_eq!(h.recognizer.sessions(), 3);

    h.recognizer.hear("").await;
    h.settle().await;
    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(
        h.spoken(),
        vec![
            phrases().listen_prompt,
            phrases().relisten_prompt,
            phrases().relisten_prompt,
            phrases().not_heard,
        ]
    );
    assert_eq!(
        h.orchestrator
            .history()
            .iter()
            .filter(|s| **s == AwaitingCommand)
            .count(),
        4
    );
}

#[tokio::test(start_paused = true)]
async fn test_recognition_error_returns_to_idle() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.orchestrator.request_listen().await.unwrap();

    h.recognizer.last_sink().error("network unreachable").await;
    h.settle().await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.spoken().last(), Some(&phrases().recognition_failed));
    h.assert_scheduler_invariant();
}

#[tokio::test(start_paused = true)]
async fn test_recognizer_refusing_to_start() {
    let mut h = Harness::new();
    h.recognizer.refuse();

    h.orchestrator.request_listen().await.unwrap();

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(
        h.spoken(),
        vec![phrases().listen_prompt, phrases().recognition_failed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_manual_analysis() {
    let mut h = Harness::new();
    h.orchestrator.start();

    h.orchestrator.request_manual_analysis().await.unwrap();
    assert_eq!(h.orchestrator.state(), ManualAnalysis);
    assert!(!h.orchestrator.scheduler_active());

    h.settle().await;

    assert_eq!(h.orchestrator.state(), Idle);
    assert_eq!(h.spoken(), vec!["前方OK"]);
    assert_eq!(
        h.orchestrator.history(),
        vec![Idle, ManualAnalysis, Idle]
    );
    h.assert_scheduler_invariant();

    assert!(h.orchestrator.request_listen().await.is_ok());
    assert!(h.orchestrator.request_manual_analysis().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_timer_ignored_outside_idle() {
    let mut h = Harness::new();
    h.orchestrator.start();
    h.orchestrator.request_listen().await.unwrap();

    let err = h.orchestrator.on_timer_fired(1).unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(h.capture.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_settings() {
    let settings = Settings {
        interval: Duration::from_secs(2),
        failure_threshold: 1,
        ..Settings::default()
    };
    let mut h = Harness::with(settings, MemoryPrefs::default());
    h.capture.set_failing(true);
    h.orchestrator.start();

    tokio::time::sleep(Duration::from_millis(2010)).await;
    h.settle().await;

    assert!(h.orchestrator.is_suppressed());
    assert_eq!(h.capture.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_stops_on_shutdown() {
    let h = Harness::new();
    let handle = h.orchestrator.handle();
    let task = tokio::spawn(h.orchestrator.run());

    handle.request_listen().await.unwrap();
    handle.shutdown().await.unwrap();

    assert!(task.await.unwrap().is_ok());
    assert!(handle.request_listen().await.is_err());
    assert!(h.log.lock().unwrap().contains(&AudioEvent::ListenStop));
}
