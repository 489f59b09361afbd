// tests/delivery_pump.rs
//
// Delivery pump against a recording messenger: media plan, text fallback,
// bookkeeping after a send, subscriber fan-out, plan order and the backfill
// sweep. Pacing is zero except in the paused-clock pacing tests.

mod common;

use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;

use common::{new_article, FakePages, Harness, RecordingMessenger, SendKind, CHANNEL};
use dz_news_relay::delivery::Sent;
use dz_news_relay::messaging::MediaSource;
use dz_news_relay::prioritize::DeliveryPlan;
use dz_news_relay::stats::StatsRecorder;
use dz_news_relay::store::{Article, NewArticle, Store};

async fn stored(h: &Harness, a: NewArticle) -> Article {
    h.store.insert_article(a).await.unwrap().expect("fresh link")
}

fn with_image(mut a: NewArticle, url: &str) -> NewArticle {
    a.image_url = Some(url.to_string());
    a
}

#[tokio::test]
async fn photo_post_carries_caption_and_read_more_button() {
    let h = Harness::new(RecordingMessenger::new(), FakePages::new());
    let pump = h.pump(common::registry());
    let a = stored(
        &h,
        with_image(
            new_article("الشروق", "افتتاح معرض الكتاب الدولي", "https://a.dz/1", 1.0, Utc::now()),
            "https://a.dz/img.jpg",
        ),
    )
    .await;

    assert_eq!(pump.send_article(&a).await.unwrap(), Sent::WithPhoto);

    let sent = h.messenger.sent_to(CHANNEL);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SendKind::Photo);
    assert_eq!(sent[0].media, Some(MediaSource::Url("https://a.dz/img.jpg".into())));
    assert!(sent[0].text.contains("<b>افتتاح معرض الكتاب الدولي</b>"));
    let kb = sent[0].keyboard.as_ref().expect("keyboard");
    assert_eq!(kb[0][0].callback_data, format!("read_more:{}", a.id));
}

#[tokio::test]
async fn rejected_media_falls_back_to_text_once() {
    let h = Harness::new(RecordingMessenger::new().failing_media(), FakePages::new());
    let pump = h.pump(common::registry());
    let a = stored(
        &h,
        with_image(
            new_article("الشروق", "خبر بصورة معطوبة", "https://a.dz/2", 0.0, Utc::now()),
            "https://a.dz/broken.jpg",
        ),
    )
    .await;

    assert!(pump.publish(&a).await);

    let sent = h.messenger.sent_to(CHANNEL);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SendKind::Text);
    assert!(h.store.get_article(a.id).await.unwrap().unwrap().delivered);
    assert_eq!(h.ledger.snapshot().last_errors[0].context, "send_article_media");
}

#[tokio::test]
async fn direct_video_is_attached_and_youtube_is_linked() {
    let pages = FakePages::new()
        .with(
            "https://a.dz/v1",
            r#"<html><body><video src="/media/clip.mp4"></video></body></html>"#,
        )
        .with(
            "https://a.dz/v2",
            r#"<html><body><iframe src="https://www.youtube.com/embed/abc123"></iframe></body></html>"#,
        );
    let h = Harness::new(RecordingMessenger::new(), pages);
    let pump = h.pump(common::registry());

    let v1 = stored(&h, new_article("الشروق", "فيديو مباشر", "https://a.dz/v1", 0.0, Utc::now())).await;
    let v2 = stored(&h, new_article("الشروق", "فيديو يوتيوب", "https://a.dz/v2", 0.0, Utc::now())).await;

    assert_eq!(pump.send_article(&v1).await.unwrap(), Sent::WithVideo);
    assert_eq!(pump.send_article(&v2).await.unwrap(), Sent::WithPhoto);

    let sent = h.messenger.sent();
    assert_eq!(sent[0].media, Some(MediaSource::Url("https://a.dz/media/clip.mp4".into())));
    assert_eq!(
        sent[1].media,
        Some(MediaSource::Url("https://img.youtube.com/vi/abc123/hqdefault.jpg".into()))
    );
    assert!(sent[1]
        .text
        .contains("🎬 <a href='https://www.youtube.com/embed/abc123'>شاهد الفيديو</a>"));
}

#[tokio::test]
async fn failed_send_leaves_article_pending() {
    let h = Harness::new(RecordingMessenger::new().failing_everything(), FakePages::new());
    let pump = h.pump(common::registry());
    let a = stored(&h, new_article("الشروق", "خبر لن يصل", "https://a.dz/3", 0.0, Utc::now())).await;

    assert!(!pump.publish(&a).await);
    assert!(!h.store.get_article(a.id).await.unwrap().unwrap().delivered);
    assert_eq!(StatsRecorder::new(h.store.clone()).current().await.unwrap().total_articles, 0);
}

#[tokio::test]
async fn publish_updates_stats_and_notifies_every_reachable_subscriber() {
    let h = Harness::new(RecordingMessenger::new().failing_chat("2"), FakePages::new());
    for id in [1, 2, 3] {
        h.notifier.add_user(id).await.unwrap();
    }
    let pump = h.pump(common::registry());
    let a = stored(&h, new_article("الشروق", "وزير التجارة يزور السوق", "https://a.dz/4", 0.0, Utc::now())).await;

    assert!(pump.publish(&a).await);

    let stats = StatsRecorder::new(h.store.clone()).current().await.unwrap();
    assert_eq!(stats.total_articles, 1);
    assert_eq!(stats.by_source.get("الشروق"), 1);

    assert_eq!(h.messenger.sent_to("1").len(), 1);
    assert!(h.messenger.sent_to("2").is_empty());
    let notice = &h.messenger.sent_to("3")[0];
    assert_eq!(notice.text, "خبر جديد في فئة عام:\nوزير التجارة يزور السوق\nhttps://a.dz/4");
}

#[tokio::test]
async fn plan_is_sent_urgent_local_first_and_counted() {
    let h = Harness::new(RecordingMessenger::new(), FakePages::new());
    let pump = h.pump(common::registry());
    let now = Utc::now();
    let urgent = stored(&h, new_article("الشروق", "عاجل: حادث مرور", "https://a.dz/u", 0.0, now)).await;
    let other = stored(&h, new_article("الجزيرة", "قمة إقليمية", "https://q.example/o", 0.0, now)).await;

    let plan = DeliveryPlan {
        urgent_local: vec![urgent.clone()],
        rest: vec![other.clone()],
    };
    let report = pump.run(&plan).await;
    assert_eq!((report.sent, report.failed), (2, 0));

    let links: Vec<String> = h
        .messenger
        .sent_to(CHANNEL)
        .iter()
        .map(|m| if m.text.contains("a.dz/u") { "u" } else { "o" }.to_string())
        .collect();
    assert_eq!(links, vec!["u", "o"]);
}

#[tokio::test]
async fn backfill_takes_best_sentiment_from_the_last_week() {
    let h = Harness::new(RecordingMessenger::new(), FakePages::new());
    let pump = h.pump(common::registry());
    let now = Utc::now();
    stored(&h, new_article("الشروق", "خبر سلبي", "https://a.dz/n", -1.0, now)).await;
    stored(&h, new_article("الشروق", "خبر محايد", "https://a.dz/z", 0.0, now)).await;
    stored(&h, new_article("الشروق", "خبر قديم جيد", "https://a.dz/old", 1.0, now - Duration::days(9))).await;
    let good = stored(&h, new_article("الشروق", "خبر جيد", "https://a.dz/p", 1.0, now)).await;

    let report = pump.backfill(now - Duration::days(7), 0.2, 5).await.unwrap();
    assert_eq!((report.sent, report.failed), (1, 0));
    assert!(h.store.get_article(good.id).await.unwrap().unwrap().delivered);
}

#[tokio::test(start_paused = true)]
async fn every_send_is_followed_by_the_pacing_pause_even_when_it_fails() {
    let h = Harness::new(RecordingMessenger::new().failing_text("تعطل"), FakePages::new());
    let pacing = StdDuration::from_secs(30);
    let pump = h.paced_pump(common::registry(), pacing, StdDuration::from_secs(5));
    let now = Utc::now();
    let first = stored(&h, new_article("الشروق", "افتتاح مدرسة", "https://a.dz/p1", 0.0, now)).await;
    let second = stored(&h, new_article("الخبر", "تعطل حركة القطارات", "https://k.dz/p2", 0.0, now)).await;
    let third = stored(&h, new_article("الجزيرة", "قمة إقليمية", "https://q.example/p3", 0.0, now)).await;

    let plan = DeliveryPlan {
        urgent_local: Vec::new(),
        rest: vec![first, second.clone(), third],
    };
    let started = tokio::time::Instant::now();
    let report = pump.run(&plan).await;

    assert_eq!((report.sent, report.failed), (2, 1));
    assert!(!h.store.get_article(second.id).await.unwrap().unwrap().delivered);
    let elapsed = started.elapsed();
    assert!(elapsed >= pacing * 3, "{elapsed:?}");
    assert!(elapsed < pacing * 3 + StdDuration::from_secs(1), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn urgent_local_head_uses_its_own_cadence() {
    let h = Harness::new(RecordingMessenger::new(), FakePages::new());
    let pump = h.paced_pump(common::registry(), StdDuration::from_secs(30), StdDuration::from_secs(5));
    let now = Utc::now();
    let u1 = stored(&h, new_article("الشروق", "عاجل: حادث مرور", "https://a.dz/u1", 0.0, now)).await;
    let u2 = stored(&h, new_article("الخبر", "عاجل: انقطاع الكهرباء", "https://k.dz/u2", 0.0, now)).await;
    let other = stored(&h, new_article("الجزيرة", "قمة إقليمية", "https://q.example/o", 0.0, now)).await;

    let started = tokio::time::Instant::now();
    let report = pump
        .run(&DeliveryPlan {
            urgent_local: vec![u1, u2],
            rest: vec![other],
        })
        .await;

    assert_eq!((report.sent, report.failed), (3, 0));
    // two urgent pauses of 5s, one regular pause of 30s
    let elapsed = started.elapsed();
    assert!(elapsed >= StdDuration::from_secs(40), "{elapsed:?}");
    assert!(elapsed < StdDuration::from_secs(41), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn backfill_is_paced_like_the_pump() {
    let h = Harness::new(RecordingMessenger::new(), FakePages::new());
    let pump = h.paced_pump(common::registry(), StdDuration::from_secs(30), StdDuration::from_secs(5));
    let now = Utc::now();
    stored(&h, new_article("الشروق", "خبر جيد", "https://a.dz/b1", 1.0, now)).await;
    stored(&h, new_article("الخبر", "خبر جيد آخر", "https://k.dz/b2", 1.0, now)).await;

    let started = tokio::time::Instant::now();
    let report = pump.backfill(now - Duration::days(7), 0.2, 5).await.unwrap();
    assert_eq!(report.sent, 2);
    assert!(started.elapsed() >= StdDuration::from_secs(60));
}
