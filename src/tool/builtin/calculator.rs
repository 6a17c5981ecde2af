//! Clinical scoring calculators: BMI, eGFR (CKD-EPI 2021) and CHA₂DS₂-VASc.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tool::{Tool, ToolDescriptor, ToolError, ToolResult};

const NAME: &str = "medical_calculator";

/// Deterministic clinical score calculator.
pub struct MedicalCalculatorTool;

#[async_trait]
impl Tool for MedicalCalculatorTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            NAME,
            "Calculate common clinical scores (BMI, eGFR, CHA2DS2-VASc).",
            json!({
                "type": "object",
                "properties": {
                    "calculator": {
                        "type": "string",
                        "enum": ["bmi", "egfr", "cha2ds2_vasc"],
                        "description": "Type of calculation to perform"
                    },
                    "params": {
                        "type": "object",
                        "description": "Parameters required for the specific calculator",
                        "properties": {
                            "weight_kg": {"type": "number"},
                            "height_m": {"type": "number"},
                            "creatinine": {"type": "number"},
                            "age": {"type": "integer"},
                            "gender": {"type": "string", "enum": ["male", "female"]},
                            "congestive_heart_failure": {"type": "boolean"},
                            "hypertension": {"type": "boolean"},
                            "stroke_history": {"type": "boolean"},
                            "vascular_disease": {"type": "boolean"},
                            "diabetes": {"type": "boolean"}
                        }
                    }
                },
                "required": ["calculator", "params"]
            }),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let calculator = input["calculator"].as_str().unwrap_or_default();
        let empty = Map::new();
        let params = input["params"].as_object().unwrap_or(&empty);
        match calculator {
            "bmi" => bmi(params),
            "egfr" => egfr(params),
            "cha2ds2_vasc" => Ok(cha2ds2_vasc(params)),
            other => Err(ToolError::execution(NAME, format!("unknown calculator: {other}"))),
        }
    }
}

fn positive(params: &Map<String, Value>, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64).filter(|v| *v > 0.0)
}

fn flag(params: &Map<String, Value>, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn bmi(params: &Map<String, Value>) -> ToolResult<Value> {
    let (Some(weight), Some(height)) = (positive(params, "weight_kg"), positive(params, "height_m"))
    else {
        return Err(ToolError::execution(NAME, "BMI requires weight_kg and height_m"));
    };
    let value = weight / (height * height);
    let category = match value {
        v if v < 18.5 => "Underweight",
        v if v < 25.0 => "Normal",
        v if v < 30.0 => "Overweight",
        _ => "Obese",
    };
    Ok(json!({"value": round1(value), "unit": "kg/m²", "category": category}))
}

fn egfr(params: &Map<String, Value>) -> ToolResult<Value> {
    let creatinine = positive(params, "creatinine");
    let age = positive(params, "age");
    let gender = params.get("gender").and_then(Value::as_str);
    let (Some(cr), Some(age), Some(gender)) = (creatinine, age, gender) else {
        return Err(ToolError::execution(NAME, "eGFR requires creatinine, age, and gender"));
    };
    let female = gender == "female";
    let kappa = if female { 0.7 } else { 0.9 };
    let alpha = if female { -0.241 } else { -0.302 };
    let factor = if female { 1.012 } else { 1.0 };
    let ratio = cr / kappa;
    let value = 142.0
        * ratio.min(1.0).powf(alpha)
        * ratio.max(1.0).powf(-1.200)
        * 0.9938_f64.powf(age)
        * factor;
    Ok(json!({"value": round1(value), "unit": "mL/min/1.73m²"}))
}

fn cha2ds2_vasc(params: &Map<String, Value>) -> Value {
    let mut score = 0u32;
    for (key, points) in [
        ("congestive_heart_failure", 1),
        ("hypertension", 1),
        ("stroke_history", 2),
        ("vascular_disease", 1),
        ("diabetes", 1),
    ] {
        if flag(params, key) {
            score += points;
        }
    }
    let age = params.get("age").and_then(Value::as_u64).unwrap_or(0);
    score += match age {
        a if a >= 75 => 2,
        a if a >= 65 => 1,
        _ => 0,
    };
    if params.get("gender").and_then(Value::as_str) == Some("female") {
        score += 1;
    }
    let interpretation = if score >= 2 { "High risk" } else { "Low/Moderate risk" };
    json!({"score": score, "interpretation": interpretation})
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn calc(input: Value) -> ToolResult<Value> {
        MedicalCalculatorTool.invoke(input).await
    }

    #[tokio::test]
    async fn bmi_categories() {
        let out = calc(json!({"calculator": "bmi", "params": {"weight_kg": 70.0, "height_m": 1.75}}))
            .await
            .unwrap();
        assert_eq!(out["value"], json!(22.9));
        assert_eq!(out["category"], "Normal");

        let out = calc(json!({"calculator": "bmi", "params": {"weight_kg": 95.0, "height_m": 1.70}}))
            .await
            .unwrap();
        assert_eq!(out["category"], "Obese");
    }

    #[tokio::test]
    async fn bmi_missing_params_is_error() {
        let err = calc(json!({"calculator": "bmi", "params": {"weight_kg": 70.0}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn egfr_ckd_epi_2021() {
        // 50-year-old male, creatinine 1.0 mg/dL: 142 * (1.0/0.9)^-1.2 * 0.9938^50 ≈ 92.
        let out = calc(json!({
            "calculator": "egfr",
            "params": {"creatinine": 1.0, "age": 50, "gender": "male"}
        }))
        .await
        .unwrap();
        let value = out["value"].as_f64().unwrap();
        assert!((value - 91.7).abs() < 1.0, "eGFR was {value}");
        assert_eq!(out["unit"], "mL/min/1.73m²");
    }

    #[tokio::test]
    async fn cha2ds2_vasc_scoring() {
        let out = calc(json!({
            "calculator": "cha2ds2_vasc",
            "params": {"age": 78, "gender": "female", "hypertension": true}
        }))
        .await
        .unwrap();
        assert_eq!(out["score"], 4);
        assert_eq!(out["interpretation"], "High risk");

        let out = calc(json!({"calculator": "cha2ds2_vasc", "params": {"age": 40}}))
            .await
            .unwrap();
        assert_eq!(out["score"], 0);
        assert_eq!(out["interpretation"], "Low/Moderate risk");
    }
}
