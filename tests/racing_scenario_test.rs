//! Racing task flown end to end through a competitor pipeline

mod common;

use common::{ORIGIN, cylinder, fly, line, prepare};
use taskscore::fix::PositionFix;
use taskscore::geometry::LatLng;
use taskscore::in_order::Mode;
use taskscore::pipeline::{CompetitorPipeline, PipelineOptions};
use taskscore::scores::{PilotInfo, PilotScore};
use taskscore::task::{Direction, TaskRules};

struct Course {
    start: LatLng,
    tp1: LatLng,
    tp2: LatLng,
    finish: LatLng,
}

fn course() -> Course {
    let start = ORIGIN;
    let tp1 = start.destination(0.0, 10.0);
    let tp2 = tp1.destination(90.0, 15.0);
    let finish = tp2.destination(180.0, 8.0);
    Course {
        start,
        tp1,
        tp2,
        finish,
    }
}

fn racing_task(course: &Course) -> std::sync::Arc<taskscore::task::Task> {
    let mut legs = vec![
        line("Start", course.start, 5.0, Direction::NextPoint),
        cylinder("TP1", course.tp1, 0.5),
        cylinder("TP2", course.tp2, 0.5),
        line("Finish", course.finish, 1.0, Direction::PreviousPoint),
    ];
    for (leg, length) in legs.iter_mut().skip(1).zip([10.0, 15.0, 8.0]) {
        leg.length = Some(length);
    }
    prepare(
        TaskRules {
            handicapped: true,
            ..TaskRules::default()
        },
        legs,
    )
}

fn track(course: &Course) -> Vec<PositionFix> {
    fly(
        "LS8",
        &[
            (-60, course.start.destination(180.0, 0.5)),
            (0, course.start.destination(0.0, 0.1)),
            (1100, course.tp1),
            (2700, course.tp2),
            (3600, course.finish.destination(180.0, 0.1)),
        ],
        20,
    )
}

fn pilot() -> PilotInfo {
    PilotInfo {
        compno: "LS8".to_string(),
        name: Some("Test Pilot".to_string()),
        handicap: 110.0,
    }
}

fn replay(course: &Course, history: Vec<PositionFix>) -> (CompetitorPipeline, PilotScore) {
    let options = PipelineOptions {
        mode: Mode::Replay,
        history,
        ..PipelineOptions::default()
    };
    let mut pipeline = CompetitorPipeline::new(racing_task(course), pilot(), options);
    let score = pipeline.replay().unwrap().expect("a score");
    (pipeline, score)
}

#[test]
fn test_completed_racing_task() {
    let course = course();
    let (pipeline, score) = replay(&course, track(&course));

    assert!(pipeline.is_done());
    assert_eq!(score.utc_start, Some(0));
    assert_eq!(score.utc_finish, Some(3600));
    assert!(score.start_confirmed);
    assert_eq!(score.actual.distance, 33.0);
    assert_eq!(score.actual.task_speed, Some(33.0));
    assert_eq!(score.actual.remaining, Some(0.0));

    let handicapped = score.handicapped.expect("handicapped figures");
    assert_eq!(handicapped.distance, 30.0);
    assert_eq!(handicapped.task_speed, Some(30.0));

    assert_eq!(score.legs.len(), 3);
    let names: Vec<_> = score.legs.iter().map(|leg| leg.name.as_str()).collect();
    assert_eq!(names, vec!["TP1", "TP2", "Finish"]);
    assert!(score.legs.iter().all(|leg| !leg.estimated));
    assert_eq!(score.legs[2].actual.task_distance, 33.0);
    assert_eq!(score.legs[2].time, Some(3600));
}

#[test]
fn test_shuffled_and_duplicated_fixes_score_the_same() {
    let course = course();
    let mut fixes = track(&course);
    let duplicates: Vec<_> = fixes.iter().step_by(7).cloned().collect();
    fixes.extend(duplicates);
    fixes.reverse();

    let (_, score) = replay(&course, fixes);
    assert_eq!(score.utc_start, Some(0));
    assert_eq!(score.utc_finish, Some(3600));
    assert_eq!(score.actual.distance, 33.0);
}

#[test]
fn test_part_way_round_second_leg() {
    let course = course();
    let fixes: Vec<_> = track(&course).into_iter().filter(|f| f.t <= 2000).collect();
    let last = fixes.last().cloned().unwrap();
    let (pipeline, score) = replay(&course, fixes);

    assert_eq!(score.t, 2000);
    assert_eq!(score.current_leg, 2);
    assert_eq!(score.utc_finish, None);
    assert!(pipeline.status().legs[1].achieved());

    let to_tp2 = last.location().distance_to(&course.tp2) - 0.5;
    let expected = 10.0 + 15.0 - to_tp2;
    assert!((score.actual.distance - expected).abs() < 0.15, "got {}", score.actual.distance);
    assert_eq!(score.legs[0].actual.distance, 10.0);

    let remaining = score.actual.remaining.expect("remaining distance");
    assert!(remaining > to_tp2);
    let min_possible = score.min_possible.expect("min possible");
    assert!((min_possible - (score.actual.distance + remaining)).abs() < 0.2);
    assert_eq!(score.max_possible, Some(33.0));
}
