use serde_json::{json, Map, Value};

const QWEN_LIGHTNING_LORA: &str = "https://huggingface.co/DeepBeepMeep/Qwen_image/resolve/main/loras_accelerators/Qwen-Image-Edit-Lightning-4steps-V1.0-bf16.safetensors";
const QWEN_2511_LIGHTNING_LORA: &str = "https://huggingface.co/DeepBeepMeep/Qwen_image/resolve/main/loras_accelerators/Qwen-Image-Edit-2511-Lightning-4steps-V1.0-bf16.safetensors";

fn qwen_lightning(lset_name: &str, lora: &str) -> Value {
    json!({
        "num_inference_steps": 4,
        "guidance_scale": 1,
        "flow_shift": 5,
        "sample_solver": "default",
        "image_mode": 1,
        "lset_name": lset_name,
        "activated_loras": [lora],
        "loras_multipliers": "1|",
    })
}

fn exact_image_overrides(model_id: &str) -> Option<Value> {
    let value = match model_id {
        "qwen_image_edit_20B" | "qwen_image_edit_plus_20B" => qwen_lightning(
            "qwen\\Lightning Qwen Edit v1.0 - 4 Steps.json",
            QWEN_LIGHTNING_LORA,
        ),
        "qwen_image_20B" => {
            qwen_lightning("qwen\\Lightning Qwen v1.0 - 4 Steps.json", QWEN_LIGHTNING_LORA)
        }
        "qwen_image_2512_20B" => qwen_lightning(
            "qwen\\Lightning Qwen Edit 2511 - 4 Steps.json",
            QWEN_2511_LIGHTNING_LORA,
        ),
        "pi_flux2" => json!({
            "num_inference_steps": 4,
            "guidance_scale": 5,
            "flow_shift": 5,
            "sample_solver": "",
            "image_mode": 1,
            "embedded_guidance_scale": 4,
        }),
        _ => return None,
    };
    Some(value)
}

/// Few-step accelerator settings for storyboard image models, or an empty map.
/// Unlisted `qwen_image*` and `pi_flux*` variants inherit their family's base settings.
pub fn image_model_overrides(model_id: &str) -> Map<String, Value> {
    let value = exact_image_overrides(model_id).or_else(|| {
        if model_id.starts_with("qwen_image") {
            exact_image_overrides("qwen_image_20B")
        } else if model_id.starts_with("pi_flux") {
            exact_image_overrides("pi_flux2")
        } else {
            None
        }
    });
    value
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default()
}

/// Reference-image handling. Only valid when the render actually carries reference
/// images; backends reject these settings otherwise.
pub fn image_reference_overrides(model_id: &str) -> Map<String, Value> {
    let remove_background = if model_id.starts_with("qwen_image") {
        1
    } else if model_id.starts_with("pi_flux") || model_id.starts_with("flux") {
        0
    } else {
        return Map::new();
    };
    json!({
        "video_prompt_type": "I",
        "image_prompt_type": "",
        "remove_background_images_ref": remove_background,
        "image_refs_relative_size": 50,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// True when the model ships a few-step override set.
pub fn has_speed_overrides(model_id: &str) -> bool {
    !image_model_overrides(model_id).is_empty()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn qwen_variants_inherit_lightning_settings() {
        let exact = image_model_overrides("qwen_image_2512_20B");
        assert_eq!(exact["num_inference_steps"], json!(4));
        assert!(exact["lset_name"]
            .as_str()
            .unwrap_or_default()
            .contains("2511"));

        let inherited = image_model_overrides("qwen_image_future_30B");
        assert_eq!(inherited, image_model_overrides("qwen_image_20B"));
        assert!(image_model_overrides("flux2_klein_4b").is_empty());
        assert!(has_speed_overrides("pi_flux2_dev"));
    }

    #[test]
    fn reference_overrides_follow_family_prefix() {
        assert_eq!(
            image_reference_overrides("qwen_image_edit_20B")["remove_background_images_ref"],
            json!(1)
        );
        assert_eq!(
            image_reference_overrides("flux2_klein_9b")["remove_background_images_ref"],
            json!(0)
        );
        assert!(image_reference_overrides("hunyuan_i2v").is_empty());
    }
}
