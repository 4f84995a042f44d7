use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use txt2img::gallery::{normalize_output, GALLERY_STORAGE_KEY};
use txt2img::{
  Error, FileStore, Gallery, GalleryStore, GenerationRequest, JobStatus,
  MemoryStore, Prediction,
};

fn succeeded(id: &str, output: serde_json::Value) -> Prediction
{   Prediction::new(id, JobStatus::Succeeded).with_output(output)
}

#[test]
fn test_bare_string_output_yields_one_item()
{   assert_eq!(
      normalize_output(Some(&json!("https://x/only.png"))),
      vec!["https://x/only.png".to_string()]
    );

    let mut gallery = Gallery::new();
    let input = GenerationRequest::new("a bare string").to_input();
    let items = assert_ok!(gallery.append_prediction(
      &succeeded("job-s", json!("https://x/only.png")),
      &input,
      "stable-diffusion"
    ));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "job-s-0");
}

#[test]
fn test_normalize_drops_non_strings_and_empties()
{   let output = json!(["https://x/a.png", null, "", 7, "https://x/b.png"]);
    assert_eq!(
      normalize_output(Some(&output)),
      vec!["https://x/a.png".to_string(), "https://x/b.png".to_string()]
    );
    assert!(normalize_output(Some(&json!(""))).is_empty());
    assert!(normalize_output(Some(&json!({"url": "x"}))).is_empty());
    assert!(normalize_output(None).is_empty());
}

#[test]
fn test_items_keep_positional_ids_and_parameters()
{   let mut gallery = Gallery::new();
    let input = GenerationRequest::new("two cats")
      .with_dimensions("768x768")
      .to_input();
    let items = assert_ok!(gallery.append_prediction(
      &succeeded("job-2", json!(["https://x/0.png", 5, "https://x/1.png"])),
      &input,
      "stable-diffusion"
    ));
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["job-2-0", "job-2-1"]);
    assert!(items.iter().all(|i| i.prompt == "two cats"));
    assert!(items.iter().all(|i| i.dimensions == "768x768"));
    assert!(items.iter().all(|i| i.parameters.as_ref() == Some(&input)));
}

#[test]
fn test_successive_jobs_append_in_generation_order()
{   let mut gallery = Gallery::new();
    let input_a = GenerationRequest::new("job a").to_input();
    let input_b = GenerationRequest::new("job b").to_input();

    assert_ok!(gallery.append_prediction(
      &succeeded("a", json!(["https://x/a2.png", "https://x/a1.png"])),
      &input_a,
      "stable-diffusion"
    ));
    let before: Vec<_> = gallery.items().to_vec();
    assert_ok!(gallery.append_prediction(
      &succeeded("b", json!(["https://x/b1.png"])),
      &input_b,
      "stable-diffusion"
    ));

    let urls: Vec<&str> = gallery.items()
      .iter()
      .map(|i| i.url.as_str())
      .collect();
    assert_eq!(
      urls,
      vec!["https://x/a2.png", "https://x/a1.png", "https://x/b1.png"]
    );
    // earlier entries untouched
    assert_eq!(&gallery.items()[..2], &before[..]);
}

#[test]
fn test_only_succeeded_predictions_are_consumed()
{   let mut gallery = Gallery::new();
    let input = GenerationRequest::new("x").to_input();
    let pending = Prediction::new("p", JobStatus::Processing)
      .with_output(json!(["https://x/partial.png"]));
    let err = assert_err!(
      gallery.append_prediction(&pending, &input, "stable-diffusion")
    );
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(gallery.is_empty());
}

#[test]
fn test_pages_are_newest_first()
{   let mut gallery = Gallery::new();
    let input = GenerationRequest::new("grid").to_input();
    let urls: Vec<String> = (0..10)
      .map(|i| format!("https://x/{}.png", i))
      .collect();
    assert_ok!(gallery.append_prediction(
      &succeeded("g", json!(urls)),
      &input,
      "stable-diffusion"
    ));

    assert_eq!(gallery.total_pages(8), 2);
    let first = gallery.page(1, 8);
    assert_eq!(first.items.len(), 8);
    assert_eq!(first.items[0].id, "g-9");
    let second = gallery.page(5, 8);
    assert_eq!(second.page, 2);
    assert_eq!(second.items.len(), 2);
    assert_eq!(second.items[1].id, "g-0");

    assert_eq!(Gallery::new().total_pages(8), 1);
    assert!(Gallery::new().page(0, 8).items.is_empty());
}

#[test]
fn test_reset_and_find()
{   let mut gallery = Gallery::new();
    let input = GenerationRequest::new("find me").to_input();
    assert_ok!(gallery.append_prediction(
      &succeeded("f", json!(["https://x/f.png"])),
      &input,
      "stable-diffusion"
    ));
    assert_eq!(
      gallery.find("f-0").map(|i| i.url.as_str()),
      Some("https://x/f.png")
    );
    gallery.reset();
    assert!(gallery.is_empty());
    assert!(gallery.find("f-0").is_none());
}

#[test]
fn test_memory_store_round_trip()
{   let store = MemoryStore::new();
    assert_eq!(assert_ok!(store.get(GALLERY_STORAGE_KEY)), None);

    let mut gallery = Gallery::new();
    let input = GenerationRequest::new("persist").to_input();
    assert_ok!(gallery.append_prediction(
      &succeeded("m", json!(["https://x/m.png"])),
      &input,
      "stable-diffusion"
    ));
    assert_ok!(gallery.save(&store));

    let raw = assert_ok!(store.get(GALLERY_STORAGE_KEY)).unwrap();
    assert!(raw.contains("\"createdAt\""));
    assert_eq!(Gallery::load(&store), gallery);
}

#[test]
fn test_corrupt_store_loads_empty()
{   let store = MemoryStore::new();
    assert_ok!(store.set(GALLERY_STORAGE_KEY, "{not json"));
    assert!(Gallery::load(&store).is_empty());
}

#[test]
fn test_items_without_parameters_still_load()
{   let store = MemoryStore::new();
    let stored = json!([
      { "id": "abc123-0"
      , "url": "https://x/old.png"
      , "prompt": "an older image"
      , "createdAt": "2024-05-01T12:30:00.000Z"
      , "model": "stable-diffusion"
      , "dimensions": "512x512"
      }
    ]);
    assert_ok!(store.set(GALLERY_STORAGE_KEY, &stored.to_string()));

    let mut gallery = Gallery::load(&store);
    assert_eq!(gallery.len(), 1);
    let item = &gallery.items()[0];
    assert_eq!(item.id, "abc123-0");
    assert_eq!(item.prompt, "an older image");
    assert_eq!(item.parameters, None);

    // appending keeps the old entry and saves it without parameters
    let input = GenerationRequest::new("a newer image").to_input();
    assert_ok!(gallery.append_prediction(
      &succeeded("new", json!(["https://x/new.png"])),
      &input,
      "stable-diffusion"
    ));
    assert_ok!(gallery.save(&store));
    let reloaded = Gallery::load(&store);
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.items()[0].parameters, None);
    assert_eq!(reloaded.items()[1].parameters, Some(input));
}

#[test]
fn test_file_store_round_trip()
{   let dir = std::env::temp_dir().join(format!(
      "txt2img-gallery-{}-{}",
      std::process::id(),
      chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let store = FileStore::new(&dir);
    assert_eq!(assert_ok!(store.get(GALLERY_STORAGE_KEY)), None);

    let mut gallery = Gallery::new();
    let input = GenerationRequest::new("on disk").to_input();
    assert_ok!(gallery.append_prediction(
      &succeeded("d", json!(["https://x/d.png"])),
      &input,
      "stable-diffusion"
    ));
    assert_ok!(gallery.save(&store));
    assert!(store.path_for(GALLERY_STORAGE_KEY).ends_with("replicate_gallery.json"));

    let reopened = FileStore::new(&dir);
    assert_eq!(Gallery::load(&reopened), gallery);

    let _ = std::fs::remove_dir_all(&dir);
}
