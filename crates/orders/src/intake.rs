use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub year: Option<u16>,
    pub plate: String,
}

/// What reception captures when a vehicle arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intake {
    pub customer: Customer,
    pub vehicle: Vehicle,
    #[serde(default)]
    pub reported_issue: String,
}

impl Intake {
    /// Trimmed copy with blank optionals dropped, or the first missing
    /// required field as a human-readable reason.
    pub fn normalized(&self) -> Result<Intake, &'static str> {
        let required = |value: &str, reason: &'static str| {
            let v = value.trim();
            if v.is_empty() { Err(reason) } else { Ok(v.to_string()) }
        };
        let optional = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(Intake {
            customer: Customer {
                name: required(&self.customer.name, "customer name is required")?,
                phone: optional(&self.customer.phone),
                email: optional(&self.customer.email),
            },
            vehicle: Vehicle {
                brand: required(&self.vehicle.brand, "vehicle brand is required")?,
                model: required(&self.vehicle.model, "vehicle model is required")?,
                year: self.vehicle.year,
                plate: required(&self.vehicle.plate, "license plate is required")?,
            },
            reported_issue: self.reported_issue.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> Intake {
        Intake {
            customer: Customer {
                name: " Maria Perez ".to_string(),
                phone: Some("  ".to_string()),
                email: Some("maria@example.com".to_string()),
            },
            vehicle: Vehicle {
                brand: "Toyota".to_string(),
                model: "Corolla".to_string(),
                year: Some(2015),
                plate: "ABC-123 ".to_string(),
            },
            reported_issue: "Squeaky brakes".to_string(),
        }
    }

    #[test]
    fn normalizes_whitespace_and_blank_optionals() {
        let n = intake().normalized().unwrap();
        assert_eq!(n.customer.name, "Maria Perez");
        assert_eq!(n.customer.phone, None);
        assert_eq!(n.vehicle.plate, "ABC-123");
    }

    #[test]
    fn reports_first_missing_required_field() {
        let mut i = intake();
        i.vehicle.model = " ".to_string();
        assert_eq!(i.normalized().unwrap_err(), "vehicle model is required");

        let mut i = intake();
        i.vehicle.plate.clear();
        assert_eq!(i.normalized().unwrap_err(), "license plate is required");
    }
}
